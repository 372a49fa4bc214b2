//! Enrichment oracle client.
//!
//! An external lookup keyed by `(artist, title, known ids)` that may return
//! extra track metadata. Enrichment is strictly best-effort: failures are
//! counted and swallowed, and returned fields never overwrite known values.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::EnrichmentConfig;
use crate::models::{CanonicalTrack, ExternalIds};
use crate::services::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};

#[derive(Debug, Serialize)]
struct EnrichRequest<'a> {
    artist_name: &'a str,
    track_title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    existing_external_ids: Option<&'a ExternalIds>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentStatus {
    Completed,
    Partial,
    Failed,
}

/// Metadata fields the oracle may return; all optional, merged non-null.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnrichmentMetadata {
    pub bpm: Option<f64>,
    pub musical_key: Option<String>,
    pub energy: Option<f64>,
    pub genre: Option<String>,
    pub label: Option<String>,
    pub isrc: Option<String>,
    pub duration_seconds: Option<i32>,
    pub release_date: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub external_ids: ExternalIds,
}

#[derive(Debug, Deserialize)]
struct EnrichResponse {
    status: EnrichmentStatus,
    #[serde(default)]
    sources_used: Vec<String>,
    #[serde(default)]
    metadata: Option<EnrichmentMetadata>,
    #[serde(default)]
    cached: bool,
}

struct RateWindow {
    used: u32,
    window_start: Instant,
}

/// Client for the external enrichment service; cheap to clone.
#[derive(Clone)]
pub struct EnrichmentOracleClient {
    client: Client,
    config: EnrichmentConfig,
    breaker: Arc<CircuitBreaker>,
    window: Arc<Mutex<RateWindow>>,
}

impl EnrichmentOracleClient {
    pub fn new(config: EnrichmentConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            config,
            breaker: Arc::new(CircuitBreaker::new(
                "enrichment-oracle",
                CircuitBreakerConfig::default(),
            )),
            window: Arc::new(Mutex::new(RateWindow {
                used: 0,
                window_start: Instant::now(),
            })),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.endpoint.is_some()
    }

    /// Whether the per-minute budget still has room; consumes one slot.
    async fn take_budget(&self) -> bool {
        let mut window = self.window.lock().await;
        if window.window_start.elapsed().as_secs() >= 60 {
            window.used = 0;
            window.window_start = Instant::now();
        }
        if window.used >= self.config.rate_per_minute {
            return false;
        }
        window.used += 1;
        true
    }

    /// Look up extra metadata for a track. Returns `None` on any failure or
    /// when the oracle had nothing; never an error.
    pub async fn enrich(
        &self,
        artist_name: &str,
        track_title: &str,
        existing_external_ids: Option<&ExternalIds>,
    ) -> Option<EnrichmentMetadata> {
        let endpoint = self.config.endpoint.as_deref()?;

        if !self.breaker.can_execute() {
            debug!("Enrichment skipped, circuit open");
            return None;
        }
        if !self.take_budget().await {
            debug!("Enrichment skipped, rate budget exhausted");
            return None;
        }

        let body = EnrichRequest {
            artist_name,
            track_title,
            existing_external_ids,
        };
        let response = self
            .client
            .post(format!("{}/enrich", endpoint.trim_end_matches('/')))
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!(status = %response.status(), "Enrichment oracle error status");
                self.breaker.record_failure();
                return None;
            }
            Err(e) => {
                debug!(error = %e, "Enrichment oracle unreachable");
                self.breaker.record_failure();
                return None;
            }
        };

        let decoded: EnrichResponse = match response.json().await {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!(error = %e, "Enrichment response decode failed");
                self.breaker.record_failure();
                return None;
            }
        };
        self.breaker.record_success();

        match decoded.status {
            EnrichmentStatus::Failed => None,
            EnrichmentStatus::Completed | EnrichmentStatus::Partial => {
                debug!(
                    sources = ?decoded.sources_used,
                    cached = decoded.cached,
                    "Enrichment returned metadata"
                );
                decoded.metadata
            }
        }
    }
}

/// Merge oracle metadata into a track, never overwriting non-null fields.
pub fn merge_enrichment(track: &mut CanonicalTrack, metadata: &EnrichmentMetadata) -> bool {
    let mut changed = false;

    if track.bpm.is_none() && metadata.bpm.is_some() {
        track.bpm = metadata.bpm;
        changed = true;
    }
    if track.musical_key.is_none() && metadata.musical_key.is_some() {
        track.musical_key = metadata.musical_key.clone();
        changed = true;
    }
    if track.energy.is_none() && metadata.energy.is_some() {
        track.energy = metadata.energy;
        changed = true;
    }
    if track.genre.is_none() && metadata.genre.is_some() {
        track.genre = metadata.genre.clone();
        changed = true;
    }
    if track.label.is_none() && metadata.label.is_some() {
        track.label = metadata.label.clone();
        changed = true;
    }
    if track.isrc.is_none() && metadata.isrc.is_some() {
        track.isrc = metadata.isrc.clone();
        changed = true;
    }
    if track.duration_seconds.is_none() && metadata.duration_seconds.is_some() {
        track.duration_seconds = metadata.duration_seconds;
        changed = true;
    }
    if track.release_date.is_none() && metadata.release_date.is_some() {
        track.release_date = metadata.release_date;
        changed = true;
    }

    let before = track.external_ids.clone();
    track.external_ids.merge(&metadata.external_ids);
    changed || track.external_ids != before
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn merge_fills_gaps_without_overwriting() {
        let mut track = CanonicalTrack::new("Your Mind", "your mind", Uuid::new_v4());
        track.bpm = Some(135.0);

        let metadata = EnrichmentMetadata {
            bpm: Some(140.0),
            musical_key: Some("5A".to_string()),
            energy: Some(0.8),
            ..EnrichmentMetadata::default()
        };

        assert!(merge_enrichment(&mut track, &metadata));
        assert_eq!(track.bpm, Some(135.0));
        assert_eq!(track.musical_key.as_deref(), Some("5A"));
        assert_eq!(track.energy, Some(0.8));
    }

    #[test]
    fn merge_reports_no_change_when_nothing_applies() {
        let mut track = CanonicalTrack::new("Your Mind", "your mind", Uuid::new_v4());
        track.bpm = Some(135.0);

        let metadata = EnrichmentMetadata {
            bpm: Some(140.0),
            ..EnrichmentMetadata::default()
        };
        assert!(!merge_enrichment(&mut track, &metadata));
    }

    #[tokio::test]
    async fn unconfigured_client_returns_none() {
        let client = EnrichmentOracleClient::new(EnrichmentConfig {
            endpoint: None,
            rate_per_minute: 60,
            request_timeout: std::time::Duration::from_secs(1),
        });
        assert!(client.enrich("Adam Beyer", "Your Mind", None).await.is_none());
    }
}
