//! Bronze writer: atomic ingestion of raw playlist payloads.
//!
//! A payload is either written completely, with positions assigned from
//! list order, or rejected; downstream consumers never see a torn playlist.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::metrics::MetricsCollector;
use crate::models::{BronzeWriteOutcome, PlaylistPayload};
use crate::storage::{BronzeStore, StoreError};

#[derive(Debug, Error)]
pub enum BronzeWriteError {
    /// Structural rejection; nothing was written.
    #[error("invalid payload: {reason}")]
    InvalidPayload { reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Validate a payload against position integrity and minimal track shape.
///
/// Positions are always assigned from list order, so integrity violations
/// can only come from positions the source document itself declared.
pub fn validate_payload(payload: &PlaylistPayload) -> Result<(), String> {
    if payload.tracks_in_order.is_empty() {
        return Err("playlist has no tracks".to_string());
    }

    for (index, track) in payload.tracks_in_order.iter().enumerate() {
        let expected = index as i32 + 1;
        if let Some(declared) = track.source_position {
            if declared != expected {
                return Err(format!(
                    "declared position {} at index {} breaks the 1..N sequence",
                    declared, index
                ));
            }
        }
        if track.artist.is_none() && track.title.is_none() {
            return Err(format!("track at position {} has neither artist nor title", expected));
        }
    }

    Ok(())
}

/// Writes validated payloads into the Bronze store.
#[derive(Clone)]
pub struct BronzeWriter {
    store: Arc<dyn BronzeStore>,
    metrics: Option<MetricsCollector>,
}

impl BronzeWriter {
    pub fn new(store: Arc<dyn BronzeStore>) -> Self {
        Self {
            store,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Upsert one payload. Idempotent on `(source, source_url)`.
    pub async fn write(&self, payload: &PlaylistPayload) -> Result<BronzeWriteOutcome, BronzeWriteError> {
        if let Err(reason) = validate_payload(payload) {
            warn!(
                source = %payload.source,
                source_url = %payload.source_url,
                reason = %reason,
                "Rejecting payload"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_payload_rejected("invalid_payload");
            }
            return Err(BronzeWriteError::InvalidPayload { reason });
        }

        let outcome = self.store.upsert_playlist(payload, Utc::now()).await?;

        debug!(
            playlist_id = %outcome.playlist_id,
            track_count = outcome.track_count,
            rewritten = outcome.rewritten,
            "Bronze playlist written"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_bronze_write(outcome.track_count);
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SourceSite, TrackRecord};
    use crate::storage::MemoryStore;

    fn writer() -> BronzeWriter {
        BronzeWriter::new(Arc::new(MemoryStore::new()))
    }

    fn payload(tracks: Vec<TrackRecord>) -> PlaylistPayload {
        PlaylistPayload::new(SourceSite::MixesDb, "https://example/mix/1").with_tracks(tracks)
    }

    #[tokio::test]
    async fn empty_playlist_is_rejected() {
        let error = writer().write(&payload(vec![])).await.unwrap_err();
        assert!(matches!(error, BronzeWriteError::InvalidPayload { .. }));
    }

    #[tokio::test]
    async fn gapped_declared_positions_are_rejected() {
        let tracks = vec![
            TrackRecord::new("A", "One").with_source_position(1),
            TrackRecord::new("B", "Two").with_source_position(2),
            TrackRecord::new("C", "Three").with_source_position(4),
        ];
        let error = writer().write(&payload(tracks)).await.unwrap_err();
        assert!(matches!(error, BronzeWriteError::InvalidPayload { .. }));
    }

    #[tokio::test]
    async fn track_without_artist_or_title_rejects_the_playlist() {
        let mut orphan = TrackRecord::new("", "");
        orphan.artist = None;
        orphan.title = None;
        let tracks = vec![TrackRecord::new("A", "One"), orphan];
        let error = writer().write(&payload(tracks)).await.unwrap_err();
        assert!(matches!(error, BronzeWriteError::InvalidPayload { .. }));
    }

    #[tokio::test]
    async fn valid_payload_writes_positions_from_list_order() {
        let store = Arc::new(MemoryStore::new());
        let writer = BronzeWriter::new(store.clone());

        let tracks = vec![
            TrackRecord::new("Adam Beyer", "Your Mind"),
            TrackRecord::new("Amelie Lens", "Contradictions").with_source_position(2),
        ];
        let outcome = writer.write(&payload(tracks)).await.unwrap();
        assert_eq!(outcome.track_count, 2);

        let rows = crate::storage::BronzeStore::playlist_tracks(store.as_ref(), outcome.playlist_id)
            .await
            .unwrap();
        assert_eq!(rows[0].position, 1);
        assert_eq!(rows[1].position, 2);
        assert_eq!(rows[1].raw_artist.as_deref(), Some("Amelie Lens"));
    }
}
