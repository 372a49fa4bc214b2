//! In-memory store implementing every layer trait with the same semantics
//! as the Postgres store. Backs the test suites and the single-binary demo
//! mode; nothing survives a restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    AdjacencyObservation, BronzePlaylist, BronzeTrack, BronzeWriteOutcome, CanonicalArtist,
    CanonicalPlaylist, CanonicalTrack, GraphSnapshot, PlaylistPayload, PlaylistTrackEntry,
    SourceSite, TrackStats, Transition,
};

use super::{
    BronzeStore, GoldStore, OperationalStore, SilverStore, StoreError, StoreResult,
};

#[derive(Default)]
struct Inner {
    // Bronze
    bronze_playlists: HashMap<Uuid, BronzePlaylist>,
    bronze_url_index: HashMap<(SourceSite, String), Uuid>,
    bronze_tracks: HashMap<Uuid, Vec<BronzeTrack>>,

    // Silver
    artists: HashMap<Uuid, CanonicalArtist>,
    artist_name_index: HashMap<String, Uuid>,
    tracks: HashMap<Uuid, CanonicalTrack>,
    track_external_index: HashMap<(String, String), Uuid>,
    track_isrc_index: HashMap<String, Uuid>,
    silver_playlists: HashMap<Uuid, CanonicalPlaylist>,
    silver_url_index: HashMap<String, Uuid>,
    playlist_entries: HashMap<Uuid, Vec<PlaylistTrackEntry>>,
    observations: HashMap<Uuid, Vec<AdjacencyObservation>>,

    // Gold
    transitions: HashMap<(Uuid, Uuid), Transition>,
    track_stats: HashMap<Uuid, TrackStats>,

    // Operational
    graph: GraphSnapshot,
}

/// Shared in-memory store for all four layers.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BronzeStore for MemoryStore {
    async fn upsert_playlist(
        &self,
        payload: &PlaylistPayload,
        scraped_at: DateTime<Utc>,
    ) -> StoreResult<BronzeWriteOutcome> {
        let mut inner = self.inner.write().await;

        let key = (payload.source, payload.source_url.clone());
        let (playlist_id, rewritten) = match inner.bronze_url_index.get(&key) {
            Some(existing) => (*existing, true),
            None => (Uuid::new_v4(), false),
        };

        let playlist = BronzePlaylist {
            id: playlist_id,
            source: payload.source,
            source_url: payload.source_url.clone(),
            external_id: payload.meta.external_id.clone(),
            event_name: payload.meta.event_name.clone(),
            dj_name: payload.meta.dj_name.clone(),
            venue: payload.meta.venue.clone(),
            event_date: payload.meta.event_date,
            raw_blob: payload.raw_blob.clone(),
            scraped_at,
        };

        let tracks: Vec<BronzeTrack> = payload
            .tracks_in_order
            .iter()
            .enumerate()
            .map(|(index, record)| BronzeTrack {
                id: Uuid::new_v4(),
                playlist_id,
                position: index as i32 + 1,
                raw_artist: record.artist.clone(),
                raw_title: record.title.clone(),
                raw_duration_seconds: record.hints.duration_seconds,
                // The full record, hints included, is the raw capture.
                raw_blob: serde_json::to_value(record)
                    .unwrap_or_else(|_| record.raw_blob.clone()),
                scraped_at,
            })
            .collect();

        let track_count = tracks.len();
        inner.bronze_url_index.insert(key, playlist_id);
        inner.bronze_playlists.insert(playlist_id, playlist);
        // Whole-list replacement covers both position upserts and deletion
        // of stale positions past the new N.
        inner.bronze_tracks.insert(playlist_id, tracks);

        Ok(BronzeWriteOutcome {
            playlist_id,
            track_count,
            rewritten,
        })
    }

    async fn get_playlist(&self, id: Uuid) -> StoreResult<Option<BronzePlaylist>> {
        Ok(self.inner.read().await.bronze_playlists.get(&id).cloned())
    }

    async fn get_playlist_by_url(
        &self,
        source: SourceSite,
        source_url: &str,
    ) -> StoreResult<Option<BronzePlaylist>> {
        let inner = self.inner.read().await;
        Ok(inner
            .bronze_url_index
            .get(&(source, source_url.to_string()))
            .and_then(|id| inner.bronze_playlists.get(id))
            .cloned())
    }

    async fn playlist_tracks(&self, playlist_id: Uuid) -> StoreResult<Vec<BronzeTrack>> {
        let inner = self.inner.read().await;
        let mut tracks = inner
            .bronze_tracks
            .get(&playlist_id)
            .cloned()
            .unwrap_or_default();
        tracks.sort_by_key(|t| t.position);
        Ok(tracks)
    }

    async fn playlist_count(&self) -> StoreResult<i64> {
        Ok(self.inner.read().await.bronze_playlists.len() as i64)
    }
}

#[async_trait]
impl SilverStore for MemoryStore {
    async fn get_artist(&self, id: Uuid) -> StoreResult<Option<CanonicalArtist>> {
        Ok(self.inner.read().await.artists.get(&id).cloned())
    }

    async fn find_artist_by_normalized_name(
        &self,
        normalized: &str,
    ) -> StoreResult<Option<CanonicalArtist>> {
        let inner = self.inner.read().await;
        Ok(inner
            .artist_name_index
            .get(normalized)
            .and_then(|id| inner.artists.get(id))
            .cloned())
    }

    async fn insert_artist(&self, artist: &CanonicalArtist) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.artist_name_index.contains_key(&artist.normalized_name) {
            return Err(StoreError::Constraint(format!(
                "artist normalized_name '{}' already exists",
                artist.normalized_name
            )));
        }
        inner
            .artist_name_index
            .insert(artist.normalized_name.clone(), artist.id);
        inner.artists.insert(artist.id, artist.clone());
        Ok(())
    }

    async fn update_artist(&self, artist: &CanonicalArtist) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.artists.contains_key(&artist.id) {
            return Err(StoreError::NotFound(format!("artist {}", artist.id)));
        }
        inner.artists.insert(artist.id, artist.clone());
        Ok(())
    }

    async fn get_track(&self, id: Uuid) -> StoreResult<Option<CanonicalTrack>> {
        Ok(self.inner.read().await.tracks.get(&id).cloned())
    }

    async fn find_track_by_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> StoreResult<Option<CanonicalTrack>> {
        let inner = self.inner.read().await;
        Ok(inner
            .track_external_index
            .get(&(provider.to_string(), external_id.to_string()))
            .and_then(|id| inner.tracks.get(id))
            .cloned())
    }

    async fn find_track_by_isrc(&self, isrc: &str) -> StoreResult<Option<CanonicalTrack>> {
        let inner = self.inner.read().await;
        Ok(inner
            .track_isrc_index
            .get(isrc)
            .and_then(|id| inner.tracks.get(id))
            .cloned())
    }

    async fn tracks_by_artist(&self, artist_id: Uuid) -> StoreResult<Vec<CanonicalTrack>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tracks
            .values()
            .filter(|t| t.primary_artist_id == artist_id)
            .cloned()
            .collect())
    }

    async fn insert_track(&self, track: &CanonicalTrack) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        for (provider, id) in track.external_ids.pairs() {
            let key = (provider.to_string(), id.to_string());
            if let Some(existing) = inner.track_external_index.get(&key) {
                if *existing != track.id {
                    return Err(StoreError::Constraint(format!(
                        "external id {}:{} already maps to another track",
                        provider, id
                    )));
                }
            }
        }
        Self::index_track(&mut *inner, track);
        inner.tracks.insert(track.id, track.clone());
        Ok(())
    }

    async fn update_track(&self, track: &CanonicalTrack) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.tracks.contains_key(&track.id) {
            return Err(StoreError::NotFound(format!("track {}", track.id)));
        }
        Self::index_track(&mut *inner, track);
        inner.tracks.insert(track.id, track.clone());
        Ok(())
    }

    async fn upsert_playlist(&self, playlist: &CanonicalPlaylist) -> StoreResult<Uuid> {
        let mut inner = self.inner.write().await;
        let id = match inner.silver_url_index.get(&playlist.source_url) {
            Some(existing) => *existing,
            None => playlist.id,
        };
        let mut row = playlist.clone();
        row.id = id;
        inner.silver_url_index.insert(row.source_url.clone(), id);
        inner.silver_playlists.insert(id, row);
        Ok(id)
    }

    async fn get_playlist(&self, id: Uuid) -> StoreResult<Option<CanonicalPlaylist>> {
        Ok(self.inner.read().await.silver_playlists.get(&id).cloned())
    }

    async fn replace_playlist_projection(
        &self,
        playlist_id: Uuid,
        entries: &[PlaylistTrackEntry],
        observations: &[AdjacencyObservation],
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.silver_playlists.contains_key(&playlist_id) {
            return Err(StoreError::NotFound(format!("canonical playlist {}", playlist_id)));
        }
        inner.playlist_entries.insert(playlist_id, entries.to_vec());
        inner
            .observations
            .insert(playlist_id, observations.to_vec());
        Ok(())
    }

    async fn observations_for_playlist(
        &self,
        playlist_id: Uuid,
    ) -> StoreResult<Vec<AdjacencyObservation>> {
        let inner = self.inner.read().await;
        let mut rows = inner
            .observations
            .get(&playlist_id)
            .cloned()
            .unwrap_or_default();
        rows.sort_by_key(|o| o.position);
        Ok(rows)
    }

    async fn all_observations(&self) -> StoreResult<Vec<AdjacencyObservation>> {
        let inner = self.inner.read().await;
        Ok(inner.observations.values().flatten().cloned().collect())
    }

    async fn observations_for_pair(
        &self,
        source_track_id: Uuid,
        target_track_id: Uuid,
    ) -> StoreResult<Vec<AdjacencyObservation>> {
        let inner = self.inner.read().await;
        Ok(inner
            .observations
            .values()
            .flatten()
            .filter(|o| o.source_track_id == source_track_id && o.target_track_id == target_track_id)
            .cloned()
            .collect())
    }

    async fn track_appearance_counts(&self) -> StoreResult<HashMap<Uuid, i64>> {
        let inner = self.inner.read().await;
        let mut counts: HashMap<Uuid, i64> = HashMap::new();
        for entries in inner.playlist_entries.values() {
            let mut seen = std::collections::HashSet::new();
            for entry in entries {
                if seen.insert(entry.canonical_track_id) {
                    *counts.entry(entry.canonical_track_id).or_insert(0) += 1;
                }
            }
        }
        Ok(counts)
    }
}

impl MemoryStore {
    fn index_track(inner: &mut Inner, track: &CanonicalTrack) {
        for (provider, id) in track.external_ids.pairs() {
            inner
                .track_external_index
                .insert((provider.to_string(), id.to_string()), track.id);
        }
        if let Some(isrc) = &track.isrc {
            inner.track_isrc_index.insert(isrc.clone(), track.id);
        }
    }
}

#[async_trait]
impl GoldStore for MemoryStore {
    async fn get_transition(
        &self,
        source_track_id: Uuid,
        target_track_id: Uuid,
    ) -> StoreResult<Option<Transition>> {
        Ok(self
            .inner
            .read()
            .await
            .transitions
            .get(&(source_track_id, target_track_id))
            .cloned())
    }

    async fn upsert_transition(&self, transition: &Transition) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let key = (transition.source_track_id, transition.target_track_id);
        // Keep the original row id across rebuilds.
        let mut row = transition.clone();
        if let Some(existing) = inner.transitions.get(&key) {
            row.id = existing.id;
        }
        inner.transitions.insert(key, row);
        Ok(())
    }

    async fn delete_transition(
        &self,
        source_track_id: Uuid,
        target_track_id: Uuid,
    ) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .transitions
            .remove(&(source_track_id, target_track_id));
        Ok(())
    }

    async fn all_transitions(&self) -> StoreResult<Vec<Transition>> {
        Ok(self.inner.read().await.transitions.values().cloned().collect())
    }

    async fn replace_track_stats(&self, stats: &[TrackStats]) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.track_stats = stats.iter().map(|s| (s.track_id, s.clone())).collect();
        Ok(())
    }

    async fn all_track_stats(&self) -> StoreResult<Vec<TrackStats>> {
        Ok(self.inner.read().await.track_stats.values().cloned().collect())
    }
}

#[async_trait]
impl OperationalStore for MemoryStore {
    async fn replace_graph(&self, snapshot: &GraphSnapshot) -> StoreResult<()> {
        self.inner.write().await.graph = snapshot.clone();
        Ok(())
    }

    async fn graph(&self) -> StoreResult<GraphSnapshot> {
        Ok(self.inner.read().await.graph.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrackRecord;

    fn payload(url: &str, tracks: &[(&str, &str)]) -> PlaylistPayload {
        PlaylistPayload::new(SourceSite::MixesDb, url).with_tracks(
            tracks
                .iter()
                .map(|(artist, title)| TrackRecord::new(*artist, *title))
                .collect(),
        )
    }

    #[tokio::test]
    async fn bronze_upsert_keeps_id_and_replaces_tracks() {
        let store = MemoryStore::new();
        let first = BronzeStore::upsert_playlist(
            &store,
            &payload("https://example/mix/1", &[("A", "One"), ("B", "Two"), ("C", "Three")]),
            Utc::now(),
        )
        .await
        .unwrap();
        assert!(!first.rewritten);
        assert_eq!(first.track_count, 3);

        let second = BronzeStore::upsert_playlist(
            &store,
            &payload("https://example/mix/1", &[("A", "One"), ("B", "Two")]),
            Utc::now(),
        )
        .await
        .unwrap();
        assert!(second.rewritten);
        assert_eq!(second.playlist_id, first.playlist_id);

        let tracks = store.playlist_tracks(first.playlist_id).await.unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].position, 1);
        assert_eq!(tracks[1].position, 2);
    }

    #[tokio::test]
    async fn artist_normalized_name_is_unique() {
        let store = MemoryStore::new();
        let artist = CanonicalArtist::new("Adam Beyer", "adam beyer");
        store.insert_artist(&artist).await.unwrap();

        let duplicate = CanonicalArtist::new("Adam Beyer", "adam beyer");
        assert!(matches!(
            store.insert_artist(&duplicate).await,
            Err(StoreError::Constraint(_))
        ));
    }

    #[tokio::test]
    async fn transition_upsert_preserves_row_id() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut transition = Transition {
            id: Uuid::new_v4(),
            source_track_id: a,
            target_track_id: b,
            occurrence_count: 1,
            observing_playlist_ids: vec![Uuid::new_v4()],
            last_observed_at: Utc::now(),
            metrics: Default::default(),
        };
        store.upsert_transition(&transition).await.unwrap();
        let original_id = store.get_transition(a, b).await.unwrap().unwrap().id;

        transition.id = Uuid::new_v4();
        transition.occurrence_count = 2;
        store.upsert_transition(&transition).await.unwrap();

        let stored = store.get_transition(a, b).await.unwrap().unwrap();
        assert_eq!(stored.id, original_id);
        assert_eq!(stored.occurrence_count, 2);
    }
}
