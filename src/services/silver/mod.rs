//! Silver canonicalizer.
//!
//! Consumes newly written Bronze playlists, resolves every raw
//! (artist, title) mention to a canonical identity and emits one adjacency
//! observation per consecutive pair of resolved tracks. A playlist is
//! processed serially under its own lock; reprocessing is idempotent.

pub mod enrichment;
pub mod normalize;

use anyhow::{Context, Result};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::CanonicalizerConfig;
use crate::metrics::MetricsCollector;
use crate::models::{
    AdjacencyObservation, BronzeTrack, CanonicalArtist, CanonicalPlaylist, CanonicalTrack,
    ObservationDropReason, PlaylistTrackEntry, TrackHints,
};
use crate::storage::{BronzeStore, SilverStore, StoreError};

pub use enrichment::{merge_enrichment, EnrichmentMetadata, EnrichmentOracleClient, EnrichmentStatus};
pub use normalize::{normalize_name, title_similarity, AliasTable, SentinelFilter};

/// Result of canonicalizing one playlist.
#[derive(Debug, Clone)]
pub struct CanonicalizationOutcome {
    pub canonical_playlist_id: Uuid,
    pub resolved_tracks: usize,
    pub observations_written: usize,
    pub dropped_pairs: usize,
    /// Union of the pairs observed before and after this run; Gold
    /// recomputes exactly these.
    pub affected_pairs: Vec<(Uuid, Uuid)>,
}

/// Per-position resolution result.
struct Resolution {
    track_id: Option<Uuid>,
    drop_reason: Option<ObservationDropReason>,
}

#[derive(Clone)]
pub struct SilverCanonicalizer {
    bronze: Arc<dyn BronzeStore>,
    store: Arc<dyn SilverStore>,
    sentinels: SentinelFilter,
    aliases: AliasTable,
    fuzzy_threshold: f64,
    enrichment: EnrichmentOracleClient,
    /// normalized artist name -> artist id
    artist_cache: Arc<DashMap<String, Uuid>>,
    /// (provider, external id) -> track id
    external_cache: Arc<DashMap<(String, String), Uuid>>,
    playlist_locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
    metrics: Option<MetricsCollector>,
}

impl SilverCanonicalizer {
    pub fn new(
        bronze: Arc<dyn BronzeStore>,
        store: Arc<dyn SilverStore>,
        config: &CanonicalizerConfig,
    ) -> Self {
        Self {
            bronze,
            store,
            sentinels: SentinelFilter::new(&config.extra_sentinels),
            aliases: AliasTable::from_pairs(&config.alias_pairs),
            fuzzy_threshold: config.fuzzy_title_threshold,
            enrichment: EnrichmentOracleClient::new(config.enrichment.clone()),
            artist_cache: Arc::new(DashMap::new()),
            external_cache: Arc::new(DashMap::new()),
            playlist_locks: Arc::new(DashMap::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Canonicalize one Bronze playlist. All observations are replaced in a
    /// single transaction, so rerunning with the same Bronze rows is a
    /// no-op in effect.
    pub async fn process_playlist(
        &self,
        bronze_playlist_id: Uuid,
        enrich: bool,
    ) -> Result<CanonicalizationOutcome> {
        let lock = self
            .playlist_locks
            .entry(bronze_playlist_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let playlist = self
            .bronze
            .get_playlist(bronze_playlist_id)
            .await?
            .with_context(|| format!("bronze playlist {} missing", bronze_playlist_id))?;
        let tracks = self.bronze.playlist_tracks(bronze_playlist_id).await?;

        // DJ attribution is metadata; sentinel DJs simply stay unattributed.
        let dj_artist_id = match &playlist.dj_name {
            Some(name) => self
                .resolve_artist(name)
                .await?
                .map(|artist| artist.id),
            None => None,
        };

        let canonical_playlist_id = self
            .store
            .upsert_playlist(&CanonicalPlaylist {
                id: Uuid::new_v4(),
                source: playlist.source,
                source_url: playlist.source_url.clone(),
                event_name: playlist.event_name.clone(),
                dj_artist_id,
                event_date: playlist.event_date,
                venue: playlist.venue.clone(),
            })
            .await?;

        let previous_pairs: HashSet<(Uuid, Uuid)> = self
            .store
            .observations_for_playlist(canonical_playlist_id)
            .await?
            .into_iter()
            .map(|o| (o.source_track_id, o.target_track_id))
            .collect();

        let mut resolutions = Vec::with_capacity(tracks.len());
        for track in &tracks {
            resolutions.push(self.resolve_bronze_track(track, enrich).await?);
        }

        let entries: Vec<PlaylistTrackEntry> = tracks
            .iter()
            .zip(&resolutions)
            .filter_map(|(track, resolution)| {
                resolution.track_id.map(|track_id| PlaylistTrackEntry {
                    canonical_playlist_id,
                    position: track.position,
                    canonical_track_id: track_id,
                })
            })
            .collect();

        let mut observations = Vec::new();
        let mut dropped_pairs = 0usize;
        for index in 0..resolutions.len().saturating_sub(1) {
            let left = &resolutions[index];
            let right = &resolutions[index + 1];
            match (left.track_id, right.track_id) {
                (Some(source_track_id), Some(target_track_id)) => {
                    observations.push(AdjacencyObservation {
                        canonical_playlist_id,
                        position: tracks[index].position,
                        source_track_id,
                        target_track_id,
                    });
                }
                _ => {
                    dropped_pairs += 1;
                    let reason = left
                        .drop_reason
                        .or(right.drop_reason)
                        .unwrap_or(ObservationDropReason::UnresolvedEndpoint);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_observation_dropped(reason.as_str());
                    }
                }
            }
        }

        self.store
            .replace_playlist_projection(canonical_playlist_id, &entries, &observations)
            .await?;

        if let Some(metrics) = &self.metrics {
            metrics.record_observations_emitted(observations.len());
        }

        let new_pairs: HashSet<(Uuid, Uuid)> = observations
            .iter()
            .map(|o| (o.source_track_id, o.target_track_id))
            .collect();
        let affected_pairs: Vec<(Uuid, Uuid)> =
            previous_pairs.union(&new_pairs).copied().collect();

        info!(
            bronze_playlist_id = %bronze_playlist_id,
            canonical_playlist_id = %canonical_playlist_id,
            resolved = entries.len(),
            observations = observations.len(),
            dropped = dropped_pairs,
            "Canonicalized playlist"
        );

        Ok(CanonicalizationOutcome {
            canonical_playlist_id,
            resolved_tracks: entries.len(),
            observations_written: observations.len(),
            dropped_pairs,
            affected_pairs,
        })
    }

    /// Resolve one raw track mention to a canonical track id, or record why
    /// it cannot anchor an observation.
    async fn resolve_bronze_track(&self, track: &BronzeTrack, enrich: bool) -> Result<Resolution> {
        let (Some(raw_artist), Some(raw_title)) = (&track.raw_artist, &track.raw_title) else {
            return Ok(Resolution {
                track_id: None,
                drop_reason: Some(ObservationDropReason::MissingRawFields),
            });
        };

        let Some(artist) = self.resolve_artist(raw_artist).await? else {
            return Ok(Resolution {
                track_id: None,
                drop_reason: Some(ObservationDropReason::SentinelArtist),
            });
        };

        let hints = decode_hints(&track.raw_blob);
        let canonical = self
            .resolve_track(raw_title, &artist, &hints, track.raw_duration_seconds, enrich)
            .await?;

        Ok(Resolution {
            track_id: Some(canonical),
            drop_reason: None,
        })
    }

    /// Find or create the canonical artist for a raw credit. `None` means
    /// the credit is a sentinel placeholder.
    pub async fn resolve_artist(&self, raw_name: &str) -> Result<Option<CanonicalArtist>> {
        let normalized = normalize_name(raw_name);
        let normalized = self.aliases.resolve(&normalized).to_string();

        if normalized.is_empty() || self.sentinels.is_sentinel(&normalized) {
            return Ok(None);
        }

        if let Some(artist_id) = self.artist_cache.get(&normalized) {
            if let Some(artist) = self.store.get_artist(*artist_id).await? {
                return Ok(Some(artist));
            }
        }

        if let Some(artist) = self.store.find_artist_by_normalized_name(&normalized).await? {
            self.artist_cache.insert(normalized, artist.id);
            return Ok(Some(artist));
        }

        // An alias-routed credit takes the table's display casing; the raw
        // form would otherwise become the permanent canonical name.
        let display_name = self
            .aliases
            .canonical_display(&normalized)
            .unwrap_or(raw_name.trim());
        let artist = CanonicalArtist::new(display_name, normalized.clone());
        match self.store.insert_artist(&artist).await {
            Ok(()) => {
                self.artist_cache.insert(normalized, artist.id);
                Ok(Some(artist))
            }
            // Lost a create race; the row exists now.
            Err(StoreError::Constraint(_)) => {
                let existing = self
                    .store
                    .find_artist_by_normalized_name(&normalized)
                    .await?
                    .context("artist vanished after constraint conflict")?;
                self.artist_cache.insert(normalized, existing.id);
                Ok(Some(existing))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resolution order: strong external id, then ISRC, then fuzzy title
    /// within the same artist, then create.
    async fn resolve_track(
        &self,
        raw_title: &str,
        artist: &CanonicalArtist,
        hints: &TrackHints,
        raw_duration_seconds: Option<i32>,
        enrich: bool,
    ) -> Result<Uuid> {
        let normalized_title = normalize_name(raw_title);

        // 1. Strong external id match.
        for (provider, external_id) in hints.external_ids.pairs() {
            let key = (provider.to_string(), external_id.to_string());
            if let Some(track_id) = self.external_cache.get(&key) {
                return Ok(*track_id);
            }
            if let Some(existing) = self
                .store
                .find_track_by_external_id(provider, external_id)
                .await?
            {
                let id = existing.id;
                self.cache_track_ids(&existing);
                self.absorb_hints(existing, hints, raw_duration_seconds).await?;
                return Ok(id);
            }
        }

        // 2. ISRC match.
        if let Some(isrc) = &hints.isrc {
            if let Some(existing) = self.store.find_track_by_isrc(isrc).await? {
                let id = existing.id;
                self.cache_track_ids(&existing);
                self.absorb_hints(existing, hints, raw_duration_seconds).await?;
                return Ok(id);
            }
        }

        // 3. Fuzzy title match restricted to the exact same artist.
        let candidates = self.store.tracks_by_artist(artist.id).await?;
        let best = candidates
            .into_iter()
            .map(|candidate| {
                let score = title_similarity(&normalized_title, &candidate.normalized_title);
                (candidate, score)
            })
            .filter(|(_, score)| *score >= self.fuzzy_threshold)
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        if let Some((existing, score)) = best {
            debug!(
                track_id = %existing.id,
                score,
                title = %raw_title,
                "Fuzzy-matched track"
            );
            let id = existing.id;
            self.cache_track_ids(&existing);
            self.absorb_hints(existing, hints, raw_duration_seconds).await?;
            return Ok(id);
        }

        // 4. Create.
        let mut track = CanonicalTrack::new(raw_title.trim(), normalized_title, artist.id);
        track.duration_seconds = hints.duration_seconds.or(raw_duration_seconds);
        track.isrc = hints.isrc.clone();
        track.external_ids = hints.external_ids.clone();
        track.bpm = hints.bpm;
        track.musical_key = hints.musical_key.clone();
        track.genre = hints.genre.clone();
        track.label = hints.label.clone();

        if enrich {
            self.enrich_track(&mut track, &artist.canonical_name).await;
        }

        match self.store.insert_track(&track).await {
            Ok(()) => {
                self.cache_track_ids(&track);
                Ok(track.id)
            }
            // An external id landed concurrently; resolve through it.
            Err(StoreError::Constraint(_)) => {
                for (provider, external_id) in track.external_ids.pairs() {
                    if let Some(existing) = self
                        .store
                        .find_track_by_external_id(provider, external_id)
                        .await?
                    {
                        self.cache_track_ids(&existing);
                        return Ok(existing.id);
                    }
                }
                Err(anyhow::anyhow!(
                    "track insert conflicted without a resolvable external id"
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Merge opportunistic hints into an already-canonical track.
    async fn absorb_hints(
        &self,
        mut track: CanonicalTrack,
        hints: &TrackHints,
        raw_duration_seconds: Option<i32>,
    ) -> Result<()> {
        let mut changed = false;

        if track.duration_seconds.is_none() {
            if let Some(duration) = hints.duration_seconds.or(raw_duration_seconds) {
                track.duration_seconds = Some(duration);
                changed = true;
            }
        }
        if track.bpm.is_none() && hints.bpm.is_some() {
            track.bpm = hints.bpm;
            changed = true;
        }
        if track.musical_key.is_none() && hints.musical_key.is_some() {
            track.musical_key = hints.musical_key.clone();
            changed = true;
        }
        if track.genre.is_none() && hints.genre.is_some() {
            track.genre = hints.genre.clone();
            changed = true;
        }
        if track.label.is_none() && hints.label.is_some() {
            track.label = hints.label.clone();
            changed = true;
        }
        if track.isrc.is_none() && hints.isrc.is_some() {
            track.isrc = hints.isrc.clone();
            changed = true;
        }
        let before = track.external_ids.clone();
        track.external_ids.merge(&hints.external_ids);
        changed = changed || track.external_ids != before;

        if changed {
            self.store.update_track(&track).await?;
            self.cache_track_ids(&track);
        }
        Ok(())
    }

    async fn enrich_track(&self, track: &mut CanonicalTrack, artist_name: &str) {
        if !self.enrichment.is_configured() {
            return;
        }
        let known_ids = (!track.external_ids.is_empty()).then(|| track.external_ids.clone());
        match self
            .enrichment
            .enrich(artist_name, &track.title, known_ids.as_ref())
            .await
        {
            Some(metadata) => {
                merge_enrichment(track, &metadata);
                if let Some(metrics) = &self.metrics {
                    metrics.record_enrichment_call("ok");
                }
            }
            None => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_enrichment_call("failed");
                }
            }
        }
    }

    fn cache_track_ids(&self, track: &CanonicalTrack) {
        for (provider, external_id) in track.external_ids.pairs() {
            self.external_cache
                .insert((provider.to_string(), external_id.to_string()), track.id);
        }
    }
}

/// Track hints travel through Bronze inside the stored record blob;
/// recover them here.
fn decode_hints(raw_blob: &serde_json::Value) -> TrackHints {
    raw_blob
        .get("hints")
        .cloned()
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CanonicalizerConfig, EnrichmentConfig};
    use crate::models::{PlaylistPayload, SourceSite, TrackRecord};
    use crate::storage::{BronzeStore, SilverStore, Stores};
    use std::time::Duration;

    fn test_config() -> CanonicalizerConfig {
        CanonicalizerConfig {
            fuzzy_title_threshold: 0.92,
            extra_sentinels: Vec::new(),
            alias_pairs: vec![("CDW".to_string(), "Charlotte de Witte".to_string())],
            enrichment: EnrichmentConfig {
                endpoint: None,
                rate_per_minute: 60,
                request_timeout: Duration::from_secs(1),
            },
        }
    }

    fn canonicalizer() -> (SilverCanonicalizer, Stores) {
        let stores = Stores::memory();
        let canonicalizer = SilverCanonicalizer::new(
            stores.bronze.clone(),
            stores.silver.clone(),
            &test_config(),
        );
        (canonicalizer, stores)
    }

    async fn write_playlist(
        stores: &Stores,
        url: &str,
        tracks: Vec<TrackRecord>,
    ) -> Uuid {
        let payload = PlaylistPayload::new(SourceSite::MixesDb, url).with_tracks(tracks);
        stores
            .bronze
            .upsert_playlist(&payload, chrono::Utc::now())
            .await
            .unwrap()
            .playlist_id
    }

    #[tokio::test]
    async fn artists_deduplicate_across_casing_and_accents() {
        let (canonicalizer, _stores) = canonicalizer();
        let first = canonicalizer
            .resolve_artist("Amélie Lens")
            .await
            .unwrap()
            .unwrap();
        let second = canonicalizer
            .resolve_artist("  AMELIE   LENS ")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.canonical_name, "Amélie Lens");
    }

    #[tokio::test]
    async fn sentinel_credits_resolve_to_nothing() {
        let (canonicalizer, _stores) = canonicalizer();
        assert!(canonicalizer.resolve_artist("Unknown").await.unwrap().is_none());
        assert!(canonicalizer
            .resolve_artist("various ARTISTS")
            .await
            .unwrap()
            .is_none());
        assert!(canonicalizer.resolve_artist("VA").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn alias_table_routes_to_the_canonical_artist() {
        let (canonicalizer, _stores) = canonicalizer();
        let full = canonicalizer
            .resolve_artist("Charlotte de Witte")
            .await
            .unwrap()
            .unwrap();
        let via_alias = canonicalizer.resolve_artist("CDW").await.unwrap().unwrap();
        assert_eq!(full.id, via_alias.id);
    }

    #[tokio::test]
    async fn alias_arriving_first_still_creates_the_canonical_display_name() {
        let (canonicalizer, _stores) = canonicalizer();

        // No full-form credit exists yet; the alias must not become the
        // permanent display name.
        let via_alias = canonicalizer.resolve_artist("CDW").await.unwrap().unwrap();
        assert_eq!(via_alias.canonical_name, "Charlotte de Witte");
        assert_eq!(via_alias.normalized_name, "charlotte de witte");

        let full = canonicalizer
            .resolve_artist("Charlotte de Witte")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(full.id, via_alias.id);
        assert_eq!(full.canonical_name, "Charlotte de Witte");
    }

    #[tokio::test]
    async fn near_identical_titles_fuse_and_distinct_titles_fork() {
        let (canonicalizer, stores) = canonicalizer();
        let first = write_playlist(
            &stores,
            "https://example/mix/1",
            vec![
                TrackRecord::new("Amelie Lens", "Contradictions"),
                TrackRecord::new("Amelie Lens", "In My Mind"),
            ],
        )
        .await;
        canonicalizer.process_playlist(first, false).await.unwrap();

        // Singular/plural variant of an existing title fuses into it;
        // an unrelated title becomes a new canonical track.
        let second = write_playlist(
            &stores,
            "https://example/mix/2",
            vec![
                TrackRecord::new("Amelie Lens", "Contradiction"),
                TrackRecord::new("Amelie Lens", "Feel It"),
            ],
        )
        .await;
        canonicalizer.process_playlist(second, false).await.unwrap();

        let artist = canonicalizer
            .resolve_artist("Amelie Lens")
            .await
            .unwrap()
            .unwrap();
        let tracks = stores.silver.tracks_by_artist(artist.id).await.unwrap();
        let titles: Vec<&str> = tracks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(tracks.len(), 3, "got {:?}", titles);
    }

    #[tokio::test]
    async fn strong_external_ids_beat_title_differences() {
        let (canonicalizer, stores) = canonicalizer();

        let mut hinted = TrackRecord::new("Adam Beyer", "Your Mind");
        hinted.hints.external_ids.beatport = Some("18240051".to_string());
        let first = write_playlist(
            &stores,
            "https://example/mix/1",
            vec![hinted, TrackRecord::new("Ben Klock", "Subzero")],
        )
        .await;
        canonicalizer.process_playlist(first, false).await.unwrap();

        // Same Beatport id under a retitled credit resolves to the same row.
        let mut retitled = TrackRecord::new("Adam Beyer", "Your Mind (Original Mix)");
        retitled.hints.external_ids.beatport = Some("18240051".to_string());
        let second = write_playlist(
            &stores,
            "https://example/mix/2",
            vec![retitled, TrackRecord::new("Ben Klock", "Subzero")],
        )
        .await;
        canonicalizer.process_playlist(second, false).await.unwrap();

        let resolved = stores
            .silver
            .find_track_by_external_id("beatport", "18240051")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.title, "Your Mind");

        let artist = canonicalizer
            .resolve_artist("Adam Beyer")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stores.silver.tracks_by_artist(artist.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn observation_positions_cover_resolved_prefix_pairs() {
        let (canonicalizer, stores) = canonicalizer();
        let playlist = write_playlist(
            &stores,
            "https://example/mix/1",
            vec![
                TrackRecord::new("Adam Beyer", "Your Mind"),
                TrackRecord::new("Amelie Lens", "Contradictions"),
                TrackRecord::new("Unknown", "ID"),
                TrackRecord::new("Ben Klock", "Subzero"),
            ],
        )
        .await;
        let outcome = canonicalizer.process_playlist(playlist, false).await.unwrap();

        assert_eq!(outcome.observations_written, 1);
        assert_eq!(outcome.dropped_pairs, 2);

        let observations = stores
            .silver
            .observations_for_playlist(outcome.canonical_playlist_id)
            .await
            .unwrap();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].position, 1);
    }

    #[tokio::test]
    async fn shrinking_playlist_removes_tail_observations() {
        let (canonicalizer, stores) = canonicalizer();
        let url = "https://example/mix/shrink";
        let first = write_playlist(
            &stores,
            url,
            vec![
                TrackRecord::new("Adam Beyer", "Your Mind"),
                TrackRecord::new("Amelie Lens", "Contradictions"),
                TrackRecord::new("Ben Klock", "Subzero"),
            ],
        )
        .await;
        let outcome = canonicalizer.process_playlist(first, false).await.unwrap();
        assert_eq!(outcome.observations_written, 2);

        let second = write_playlist(
            &stores,
            url,
            vec![
                TrackRecord::new("Adam Beyer", "Your Mind"),
                TrackRecord::new("Amelie Lens", "Contradictions"),
            ],
        )
        .await;
        assert_eq!(first, second, "re-scrape keeps the bronze id");
        let outcome = canonicalizer.process_playlist(second, false).await.unwrap();
        assert_eq!(outcome.observations_written, 1);

        let observations = stores
            .silver
            .observations_for_playlist(outcome.canonical_playlist_id)
            .await
            .unwrap();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].position, 1);
        // The vacated pair is flagged for Gold to decrement.
        assert_eq!(outcome.affected_pairs.len(), 2);
    }
}
