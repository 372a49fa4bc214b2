//! Gold layer rows: per-transition counters with derived mix metrics, and
//! per-track aggregate statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Averages and scores derived over the observations behind one transition.
/// Components that could not be computed stay `None` and count as neutral
/// in the quality blend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub bpm_delta_avg: Option<f64>,
    pub key_compat_rate: Option<f64>,
    pub energy_delta_avg: Option<f64>,
    pub confidence: f64,
    pub quality: f64,
}

/// A directed transition `(source → target)` with the distinct playlists
/// that prove it. Unique on `(source_track_id, target_track_id)`;
/// `occurrence_count` always equals the size of `observing_playlist_ids`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub id: Uuid,
    pub source_track_id: Uuid,
    pub target_track_id: Uuid,
    pub occurrence_count: i64,
    pub observing_playlist_ids: Vec<Uuid>,
    pub last_observed_at: DateTime<Utc>,
    pub metrics: DerivedMetrics,
}

/// Aggregate statistics for one canonical track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackStats {
    pub track_id: Uuid,
    /// Number of canonical playlists the track appears in.
    pub appearance_count: i64,
    pub in_degree: i64,
    pub out_degree: i64,
    /// Min-max normalized appearance count over the active set, in [0, 1].
    pub popularity: f64,
}
