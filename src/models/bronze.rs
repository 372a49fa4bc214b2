//! Bronze layer rows: raw playlists and their ordered tracks, preserved
//! verbatim for reprocessing.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::scrape::SourceSite;

/// A raw scraped playlist. Unique on `(source, source_url)`; a re-scrape
/// replaces metadata and `raw_blob` but keeps the row id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BronzePlaylist {
    pub id: Uuid,
    pub source: SourceSite,
    pub source_url: String,
    pub external_id: Option<String>,
    pub event_name: Option<String>,
    pub dj_name: Option<String>,
    pub venue: Option<String>,
    pub event_date: Option<NaiveDate>,
    pub raw_blob: serde_json::Value,
    pub scraped_at: DateTime<Utc>,
}

/// A raw track at a position within a Bronze playlist. Positions within a
/// playlist always form a gapless `1..N`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BronzeTrack {
    pub id: Uuid,
    pub playlist_id: Uuid,
    pub position: i32,
    pub raw_artist: Option<String>,
    pub raw_title: Option<String>,
    pub raw_duration_seconds: Option<i32>,
    pub raw_blob: serde_json::Value,
    pub scraped_at: DateTime<Utc>,
}

/// Result of one atomic Bronze write.
#[derive(Debug, Clone, Serialize)]
pub struct BronzeWriteOutcome {
    pub playlist_id: Uuid,
    pub track_count: usize,
    /// True when an existing `(source, source_url)` row was replaced.
    pub rewritten: bool,
}
