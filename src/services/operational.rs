//! Operational materializer.
//!
//! Projects Gold into the node/edge graph read services consume. The
//! projection is a pure function of Gold and the canonical track metadata,
//! so a full rebuild from the same input produces identical state.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

use crate::config::OperationalConfig;
use crate::models::{EdgeAttributes, GraphEdge, GraphNode, GraphSnapshot, NodeAttributes};
use crate::storage::{GoldStore, OperationalStore, SilverStore};

#[derive(Debug, Clone, Default)]
pub struct MaterializeSummary {
    pub nodes: usize,
    pub edges: usize,
    /// Edges held back by the weight threshold; they stay in Gold.
    pub filtered_edges: usize,
}

#[derive(Clone)]
pub struct OperationalMaterializer {
    silver: Arc<dyn SilverStore>,
    gold: Arc<dyn GoldStore>,
    operational: Arc<dyn OperationalStore>,
    config: OperationalConfig,
}

impl OperationalMaterializer {
    pub fn new(
        silver: Arc<dyn SilverStore>,
        gold: Arc<dyn GoldStore>,
        operational: Arc<dyn OperationalStore>,
        config: OperationalConfig,
    ) -> Self {
        Self {
            silver,
            gold,
            operational,
            config,
        }
    }

    /// Replace the whole graph projection from current Gold state.
    pub async fn materialize(&self) -> Result<MaterializeSummary> {
        let stats = self.gold.all_track_stats().await?;
        let transitions = self.gold.all_transitions().await?;

        let mut nodes = Vec::with_capacity(stats.len());
        let mut node_ids = HashSet::new();
        for stat in &stats {
            let track = self
                .silver
                .get_track(stat.track_id)
                .await?
                .with_context(|| format!("track {} behind stats row missing", stat.track_id))?;
            let artist = self
                .silver
                .get_artist(track.primary_artist_id)
                .await?
                .with_context(|| format!("artist {} missing", track.primary_artist_id))?;

            node_ids.insert(track.id);
            nodes.push(GraphNode {
                id: track.id,
                label: format!("{} - {}", artist.canonical_name, track.title),
                attributes: NodeAttributes {
                    artist: artist.canonical_name,
                    title: track.title,
                    bpm: track.bpm,
                    musical_key: track.musical_key,
                    popularity: stat.popularity,
                    appearance_count: stat.appearance_count,
                },
            });
        }

        let mut filtered_edges = 0usize;
        let mut edges = Vec::with_capacity(transitions.len());
        for transition in transitions {
            // Self-loops never reach the read side.
            if transition.source_track_id == transition.target_track_id {
                continue;
            }
            if transition.occurrence_count < self.config.min_edge_weight {
                filtered_edges += 1;
                continue;
            }
            // Edges always point at materialized nodes.
            if !node_ids.contains(&transition.source_track_id)
                || !node_ids.contains(&transition.target_track_id)
            {
                continue;
            }
            edges.push(GraphEdge {
                source_id: transition.source_track_id,
                target_id: transition.target_track_id,
                weight: transition.occurrence_count,
                attributes: EdgeAttributes {
                    confidence: transition.metrics.confidence,
                    quality: transition.metrics.quality,
                    avg_bpm_delta: transition.metrics.bpm_delta_avg,
                },
            });
        }

        // Deterministic ordering keeps rebuilds byte-identical.
        nodes.sort_by_key(|n| n.id);
        edges.sort_by_key(|e| (e.source_id, e.target_id));

        let summary = MaterializeSummary {
            nodes: nodes.len(),
            edges: edges.len(),
            filtered_edges,
        };

        self.operational
            .replace_graph(&GraphSnapshot { nodes, edges })
            .await?;

        info!(
            nodes = summary.nodes,
            edges = summary.edges,
            filtered = summary.filtered_edges,
            "Materialized operational graph"
        );
        Ok(summary)
    }
}
