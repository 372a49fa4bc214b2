//! Per-layer persistence seams for the medallion pipeline.
//!
//! Each trait owns the atomicity of its logical unit: one playlist for
//! Bronze and Silver writes, one `(source, target)` pair for Gold upserts,
//! the whole projection for Operational. Downstream layers only ever read
//! upstream rows; any layer can be dropped and rebuilt from the layer above.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AdjacencyObservation, BronzePlaylist, BronzeTrack, BronzeWriteOutcome, CanonicalArtist,
    CanonicalPlaylist, CanonicalTrack, GraphSnapshot, PlaylistPayload, PlaylistTrackEntry,
    SourceSite, TrackStats, Transition,
};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Errors surfaced by the store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("row not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Bronze: raw playlists and ordered tracks, written atomically per playlist.
#[async_trait]
pub trait BronzeStore: Send + Sync {
    /// Upsert one validated payload: playlist row keyed by
    /// `(source, source_url)`, tracks replaced by position, stale positions
    /// deleted. One transaction; on failure nothing is visible.
    async fn upsert_playlist(
        &self,
        payload: &PlaylistPayload,
        scraped_at: DateTime<Utc>,
    ) -> StoreResult<BronzeWriteOutcome>;

    async fn get_playlist(&self, id: Uuid) -> StoreResult<Option<BronzePlaylist>>;

    async fn get_playlist_by_url(
        &self,
        source: SourceSite,
        source_url: &str,
    ) -> StoreResult<Option<BronzePlaylist>>;

    /// Tracks of a playlist ordered by position.
    async fn playlist_tracks(&self, playlist_id: Uuid) -> StoreResult<Vec<BronzeTrack>>;

    async fn playlist_count(&self) -> StoreResult<i64>;
}

/// Silver: canonical entities plus per-playlist resolved membership and
/// adjacency observations.
#[async_trait]
pub trait SilverStore: Send + Sync {
    async fn get_artist(&self, id: Uuid) -> StoreResult<Option<CanonicalArtist>>;

    async fn find_artist_by_normalized_name(
        &self,
        normalized: &str,
    ) -> StoreResult<Option<CanonicalArtist>>;

    async fn insert_artist(&self, artist: &CanonicalArtist) -> StoreResult<()>;

    async fn update_artist(&self, artist: &CanonicalArtist) -> StoreResult<()>;

    async fn get_track(&self, id: Uuid) -> StoreResult<Option<CanonicalTrack>>;

    async fn find_track_by_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> StoreResult<Option<CanonicalTrack>>;

    async fn find_track_by_isrc(&self, isrc: &str) -> StoreResult<Option<CanonicalTrack>>;

    /// All canonical tracks attributed to an artist, for fuzzy title matching.
    async fn tracks_by_artist(&self, artist_id: Uuid) -> StoreResult<Vec<CanonicalTrack>>;

    async fn insert_track(&self, track: &CanonicalTrack) -> StoreResult<()>;

    async fn update_track(&self, track: &CanonicalTrack) -> StoreResult<()>;

    /// Upsert on unique `source_url`, keeping the existing id.
    async fn upsert_playlist(&self, playlist: &CanonicalPlaylist) -> StoreResult<Uuid>;

    async fn get_playlist(&self, id: Uuid) -> StoreResult<Option<CanonicalPlaylist>>;

    /// Replace the resolved membership and the complete observation set for
    /// one playlist in a single transaction. Prior rows at any position are
    /// dropped, which also removes observations past the new `N-1`.
    async fn replace_playlist_projection(
        &self,
        playlist_id: Uuid,
        entries: &[PlaylistTrackEntry],
        observations: &[AdjacencyObservation],
    ) -> StoreResult<()>;

    async fn observations_for_playlist(
        &self,
        playlist_id: Uuid,
    ) -> StoreResult<Vec<AdjacencyObservation>>;

    async fn all_observations(&self) -> StoreResult<Vec<AdjacencyObservation>>;

    async fn observations_for_pair(
        &self,
        source_track_id: Uuid,
        target_track_id: Uuid,
    ) -> StoreResult<Vec<AdjacencyObservation>>;

    /// Distinct-playlist appearance count per canonical track.
    async fn track_appearance_counts(&self) -> StoreResult<HashMap<Uuid, i64>>;
}

/// Gold: per-transition counters and per-track statistics.
#[async_trait]
pub trait GoldStore: Send + Sync {
    async fn get_transition(
        &self,
        source_track_id: Uuid,
        target_track_id: Uuid,
    ) -> StoreResult<Option<Transition>>;

    async fn upsert_transition(&self, transition: &Transition) -> StoreResult<()>;

    async fn delete_transition(
        &self,
        source_track_id: Uuid,
        target_track_id: Uuid,
    ) -> StoreResult<()>;

    async fn all_transitions(&self) -> StoreResult<Vec<Transition>>;

    async fn replace_track_stats(&self, stats: &[TrackStats]) -> StoreResult<()>;

    async fn all_track_stats(&self) -> StoreResult<Vec<TrackStats>>;
}

/// Operational: the read-optimized graph projection.
#[async_trait]
pub trait OperationalStore: Send + Sync {
    /// Replace the whole projection atomically; rebuilding from the same
    /// Gold state must be a no-op in effect.
    async fn replace_graph(&self, snapshot: &GraphSnapshot) -> StoreResult<()>;

    async fn graph(&self) -> StoreResult<GraphSnapshot>;
}

/// Handles to all four layer stores.
#[derive(Clone)]
pub struct Stores {
    pub bronze: Arc<dyn BronzeStore>,
    pub silver: Arc<dyn SilverStore>,
    pub gold: Arc<dyn GoldStore>,
    pub operational: Arc<dyn OperationalStore>,
}

impl Stores {
    /// In-memory store shared across all layers (tests, demo mode).
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            bronze: store.clone(),
            silver: store.clone(),
            gold: store.clone(),
            operational: store,
        }
    }

    /// Postgres-backed stores over one shared pool.
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        let store = Arc::new(PostgresStore::new(pool));
        Self {
            bronze: store.clone(),
            silver: store.clone(),
            gold: store.clone(),
            operational: store,
        }
    }
}
