//! Operational layer rows: the read-optimized node/edge projection served
//! to the visualization client.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAttributes {
    pub artist: String,
    pub title: String,
    pub bpm: Option<f64>,
    #[serde(rename = "key")]
    pub musical_key: Option<String>,
    pub popularity: f64,
    pub appearance_count: i64,
}

/// A track node, sized by popularity on the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    /// Same id as the canonical track.
    pub id: Uuid,
    pub label: String,
    pub attributes: NodeAttributes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeAttributes {
    pub confidence: f64,
    pub quality: f64,
    pub avg_bpm_delta: Option<f64>,
}

/// A directed transition edge. Self-loops are forbidden and
/// `(source_id, target_id)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source_id: Uuid,
    pub target_id: Uuid,
    /// Occurrence count of the backing transition.
    pub weight: i64,
    pub attributes: EdgeAttributes,
}

/// The full materialized graph state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}
