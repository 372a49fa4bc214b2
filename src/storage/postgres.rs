//! Postgres persistence for all four medallion layers.
//!
//! Row types are private to this module; the public surface speaks the
//! domain models. Multi-row writes happen in one transaction per logical
//! unit (playlist for Bronze/Silver, pair for Gold, projection for
//! Operational).

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::{
    AdjacencyObservation, BronzePlaylist, BronzeTrack, BronzeWriteOutcome, CanonicalArtist,
    CanonicalPlaylist, CanonicalTrack, DerivedMetrics, EdgeAttributes, ExternalIds, GraphEdge,
    GraphNode, GraphSnapshot, NodeAttributes, PlaylistPayload, PlaylistTrackEntry, SourceSite,
    TrackStats, Transition,
};

use super::{BronzeStore, GoldStore, OperationalStore, SilverStore, StoreError, StoreResult};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct BronzePlaylistRow {
    id: Uuid,
    source: String,
    source_url: String,
    external_id: Option<String>,
    event_name: Option<String>,
    dj_name: Option<String>,
    venue: Option<String>,
    event_date: Option<NaiveDate>,
    raw_blob: serde_json::Value,
    scraped_at: DateTime<Utc>,
}

impl BronzePlaylistRow {
    fn into_model(self) -> StoreResult<BronzePlaylist> {
        let source = self
            .source
            .parse::<SourceSite>()
            .map_err(|e| StoreError::Other(anyhow!(e)))?;
        Ok(BronzePlaylist {
            id: self.id,
            source,
            source_url: self.source_url,
            external_id: self.external_id,
            event_name: self.event_name,
            dj_name: self.dj_name,
            venue: self.venue,
            event_date: self.event_date,
            raw_blob: self.raw_blob,
            scraped_at: self.scraped_at,
        })
    }
}

#[derive(FromRow)]
struct BronzeTrackRow {
    id: Uuid,
    playlist_id: Uuid,
    position: i32,
    raw_artist: Option<String>,
    raw_title: Option<String>,
    raw_duration_seconds: Option<i32>,
    raw_blob: serde_json::Value,
    scraped_at: DateTime<Utc>,
}

impl From<BronzeTrackRow> for BronzeTrack {
    fn from(row: BronzeTrackRow) -> Self {
        BronzeTrack {
            id: row.id,
            playlist_id: row.playlist_id,
            position: row.position,
            raw_artist: row.raw_artist,
            raw_title: row.raw_title,
            raw_duration_seconds: row.raw_duration_seconds,
            raw_blob: row.raw_blob,
            scraped_at: row.scraped_at,
        }
    }
}

#[derive(FromRow)]
struct ArtistRow {
    id: Uuid,
    canonical_name: String,
    normalized_name: String,
    aliases: Vec<String>,
    external_ids: serde_json::Value,
    country: Option<String>,
    genres: Vec<String>,
}

impl ArtistRow {
    fn into_model(self) -> StoreResult<CanonicalArtist> {
        let external_ids: ExternalIds = serde_json::from_value(self.external_ids)
            .map_err(|e| StoreError::Other(anyhow!("artist external_ids decode: {}", e)))?;
        Ok(CanonicalArtist {
            id: self.id,
            canonical_name: self.canonical_name,
            normalized_name: self.normalized_name,
            aliases: self.aliases,
            external_ids,
            country: self.country,
            genres: self.genres,
        })
    }
}

#[derive(FromRow)]
struct TrackRow {
    id: Uuid,
    title: String,
    normalized_title: String,
    primary_artist_id: Uuid,
    duration_seconds: Option<i32>,
    isrc: Option<String>,
    external_ids: serde_json::Value,
    bpm: Option<f64>,
    musical_key: Option<String>,
    energy: Option<f64>,
    genre: Option<String>,
    label: Option<String>,
    release_date: Option<NaiveDate>,
}

impl TrackRow {
    fn into_model(self) -> StoreResult<CanonicalTrack> {
        let external_ids: ExternalIds = serde_json::from_value(self.external_ids)
            .map_err(|e| StoreError::Other(anyhow!("track external_ids decode: {}", e)))?;
        Ok(CanonicalTrack {
            id: self.id,
            title: self.title,
            normalized_title: self.normalized_title,
            primary_artist_id: self.primary_artist_id,
            duration_seconds: self.duration_seconds,
            isrc: self.isrc,
            external_ids,
            bpm: self.bpm,
            musical_key: self.musical_key,
            energy: self.energy,
            genre: self.genre,
            label: self.label,
            release_date: self.release_date,
        })
    }
}

#[derive(FromRow)]
struct SilverPlaylistRow {
    id: Uuid,
    source: String,
    source_url: String,
    event_name: Option<String>,
    dj_artist_id: Option<Uuid>,
    event_date: Option<NaiveDate>,
    venue: Option<String>,
}

impl SilverPlaylistRow {
    fn into_model(self) -> StoreResult<CanonicalPlaylist> {
        let source = self
            .source
            .parse::<SourceSite>()
            .map_err(|e| StoreError::Other(anyhow!(e)))?;
        Ok(CanonicalPlaylist {
            id: self.id,
            source,
            source_url: self.source_url,
            event_name: self.event_name,
            dj_artist_id: self.dj_artist_id,
            event_date: self.event_date,
            venue: self.venue,
        })
    }
}

#[derive(FromRow)]
struct TransitionRow {
    id: Uuid,
    source_track_id: Uuid,
    target_track_id: Uuid,
    occurrence_count: i64,
    observing_playlist_ids: Vec<Uuid>,
    last_observed_at: DateTime<Utc>,
    bpm_delta_avg: Option<f64>,
    key_compat_rate: Option<f64>,
    energy_delta_avg: Option<f64>,
    confidence: f64,
    quality: f64,
}

impl From<TransitionRow> for Transition {
    fn from(row: TransitionRow) -> Self {
        Transition {
            id: row.id,
            source_track_id: row.source_track_id,
            target_track_id: row.target_track_id,
            occurrence_count: row.occurrence_count,
            observing_playlist_ids: row.observing_playlist_ids,
            last_observed_at: row.last_observed_at,
            metrics: DerivedMetrics {
                bpm_delta_avg: row.bpm_delta_avg,
                key_compat_rate: row.key_compat_rate,
                energy_delta_avg: row.energy_delta_avg,
                confidence: row.confidence,
                quality: row.quality,
            },
        }
    }
}

#[derive(FromRow)]
struct TrackStatsRow {
    track_id: Uuid,
    appearance_count: i64,
    in_degree: i64,
    out_degree: i64,
    popularity: f64,
}

impl From<TrackStatsRow> for TrackStats {
    fn from(row: TrackStatsRow) -> Self {
        TrackStats {
            track_id: row.track_id,
            appearance_count: row.appearance_count,
            in_degree: row.in_degree,
            out_degree: row.out_degree,
            popularity: row.popularity,
        }
    }
}

#[derive(FromRow)]
struct NodeRow {
    id: Uuid,
    label: String,
    artist: String,
    title: String,
    bpm: Option<f64>,
    musical_key: Option<String>,
    popularity: f64,
    appearance_count: i64,
}

#[derive(FromRow)]
struct EdgeRow {
    source_id: Uuid,
    target_id: Uuid,
    weight: i64,
    confidence: f64,
    quality: f64,
    avg_bpm_delta: Option<f64>,
}

#[async_trait]
impl BronzeStore for PostgresStore {
    async fn upsert_playlist(
        &self,
        payload: &PlaylistPayload,
        scraped_at: DateTime<Utc>,
    ) -> StoreResult<BronzeWriteOutcome> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM bronze_playlists WHERE source = $1 AND source_url = $2",
        )
        .bind(payload.source.as_str())
        .bind(&payload.source_url)
        .fetch_optional(&mut *tx)
        .await?;

        let rewritten = existing.is_some();
        let playlist_id = match existing {
            // Re-scrape: replace metadata and raw blob, keep the row id.
            Some(id) => {
                sqlx::query(
                    r#"
                    UPDATE bronze_playlists SET
                        external_id = $2, event_name = $3, dj_name = $4, venue = $5,
                        event_date = $6, raw_blob = $7, scraped_at = $8
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(&payload.meta.external_id)
                .bind(&payload.meta.event_name)
                .bind(&payload.meta.dj_name)
                .bind(&payload.meta.venue)
                .bind(payload.meta.event_date)
                .bind(&payload.raw_blob)
                .bind(scraped_at)
                .execute(&mut *tx)
                .await?;
                id
            }
            None => {
                sqlx::query_scalar(
                    r#"
                    INSERT INTO bronze_playlists
                        (id, source, source_url, external_id, event_name, dj_name, venue, event_date, raw_blob, scraped_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                    ON CONFLICT (source, source_url) DO UPDATE SET
                        external_id = EXCLUDED.external_id,
                        event_name = EXCLUDED.event_name,
                        dj_name = EXCLUDED.dj_name,
                        venue = EXCLUDED.venue,
                        event_date = EXCLUDED.event_date,
                        raw_blob = EXCLUDED.raw_blob,
                        scraped_at = EXCLUDED.scraped_at
                    RETURNING id
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(payload.source.as_str())
                .bind(&payload.source_url)
                .bind(&payload.meta.external_id)
                .bind(&payload.meta.event_name)
                .bind(&payload.meta.dj_name)
                .bind(&payload.meta.venue)
                .bind(payload.meta.event_date)
                .bind(&payload.raw_blob)
                .bind(scraped_at)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        let track_count = payload.tracks_in_order.len();

        // Stale positions past the new N must not survive a re-scrape.
        sqlx::query("DELETE FROM bronze_tracks WHERE playlist_id = $1 AND position > $2")
            .bind(playlist_id)
            .bind(track_count as i32)
            .execute(&mut *tx)
            .await?;

        for (index, record) in payload.tracks_in_order.iter().enumerate() {
            // The full record, hints included, is the raw capture.
            let raw_blob =
                serde_json::to_value(record).unwrap_or_else(|_| record.raw_blob.clone());
            sqlx::query(
                r#"
                INSERT INTO bronze_tracks
                    (id, playlist_id, position, raw_artist, raw_title, raw_duration_seconds, raw_blob, scraped_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (playlist_id, position) DO UPDATE SET
                    raw_artist = EXCLUDED.raw_artist,
                    raw_title = EXCLUDED.raw_title,
                    raw_duration_seconds = EXCLUDED.raw_duration_seconds,
                    raw_blob = EXCLUDED.raw_blob,
                    scraped_at = EXCLUDED.scraped_at
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(playlist_id)
            .bind(index as i32 + 1)
            .bind(&record.artist)
            .bind(&record.title)
            .bind(record.hints.duration_seconds)
            .bind(raw_blob)
            .bind(scraped_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(BronzeWriteOutcome {
            playlist_id,
            track_count,
            rewritten,
        })
    }

    async fn get_playlist(&self, id: Uuid) -> StoreResult<Option<BronzePlaylist>> {
        let row = sqlx::query_as::<_, BronzePlaylistRow>(
            "SELECT id, source, source_url, external_id, event_name, dj_name, venue, event_date, raw_blob, scraped_at \
             FROM bronze_playlists WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(BronzePlaylistRow::into_model).transpose()
    }

    async fn get_playlist_by_url(
        &self,
        source: SourceSite,
        source_url: &str,
    ) -> StoreResult<Option<BronzePlaylist>> {
        let row = sqlx::query_as::<_, BronzePlaylistRow>(
            "SELECT id, source, source_url, external_id, event_name, dj_name, venue, event_date, raw_blob, scraped_at \
             FROM bronze_playlists WHERE source = $1 AND source_url = $2",
        )
        .bind(source.as_str())
        .bind(source_url)
        .fetch_optional(&self.pool)
        .await?;
        row.map(BronzePlaylistRow::into_model).transpose()
    }

    async fn playlist_tracks(&self, playlist_id: Uuid) -> StoreResult<Vec<BronzeTrack>> {
        let rows = sqlx::query_as::<_, BronzeTrackRow>(
            "SELECT id, playlist_id, position, raw_artist, raw_title, raw_duration_seconds, raw_blob, scraped_at \
             FROM bronze_tracks WHERE playlist_id = $1 ORDER BY position",
        )
        .bind(playlist_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(BronzeTrack::from).collect())
    }

    async fn playlist_count(&self) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bronze_playlists")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl SilverStore for PostgresStore {
    async fn get_artist(&self, id: Uuid) -> StoreResult<Option<CanonicalArtist>> {
        let row = sqlx::query_as::<_, ArtistRow>(
            "SELECT id, canonical_name, normalized_name, aliases, external_ids, country, genres \
             FROM silver_artists WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ArtistRow::into_model).transpose()
    }

    async fn find_artist_by_normalized_name(
        &self,
        normalized: &str,
    ) -> StoreResult<Option<CanonicalArtist>> {
        let row = sqlx::query_as::<_, ArtistRow>(
            "SELECT id, canonical_name, normalized_name, aliases, external_ids, country, genres \
             FROM silver_artists WHERE normalized_name = $1",
        )
        .bind(normalized)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ArtistRow::into_model).transpose()
    }

    async fn insert_artist(&self, artist: &CanonicalArtist) -> StoreResult<()> {
        let external_ids = serde_json::to_value(&artist.external_ids)
            .map_err(|e| StoreError::Other(anyhow!(e)))?;
        sqlx::query(
            r#"
            INSERT INTO silver_artists
                (id, canonical_name, normalized_name, aliases, external_ids, country, genres)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(artist.id)
        .bind(&artist.canonical_name)
        .bind(&artist.normalized_name)
        .bind(&artist.aliases)
        .bind(external_ids)
        .bind(&artist.country)
        .bind(&artist.genres)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_artist(&self, artist: &CanonicalArtist) -> StoreResult<()> {
        let external_ids = serde_json::to_value(&artist.external_ids)
            .map_err(|e| StoreError::Other(anyhow!(e)))?;
        let result = sqlx::query(
            r#"
            UPDATE silver_artists SET
                canonical_name = $2, aliases = $3, external_ids = $4, country = $5, genres = $6
            WHERE id = $1
            "#,
        )
        .bind(artist.id)
        .bind(&artist.canonical_name)
        .bind(&artist.aliases)
        .bind(external_ids)
        .bind(&artist.country)
        .bind(&artist.genres)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("artist {}", artist.id)));
        }
        Ok(())
    }

    async fn get_track(&self, id: Uuid) -> StoreResult<Option<CanonicalTrack>> {
        let row = sqlx::query_as::<_, TrackRow>(
            "SELECT id, title, normalized_title, primary_artist_id, duration_seconds, isrc, external_ids, \
                    bpm, musical_key, energy, genre, label, release_date \
             FROM silver_tracks WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TrackRow::into_model).transpose()
    }

    async fn find_track_by_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> StoreResult<Option<CanonicalTrack>> {
        let row = sqlx::query_as::<_, TrackRow>(
            r#"
            SELECT t.id, t.title, t.normalized_title, t.primary_artist_id, t.duration_seconds, t.isrc,
                   t.external_ids, t.bpm, t.musical_key, t.energy, t.genre, t.label, t.release_date
            FROM silver_tracks t
            JOIN silver_track_external_ids x ON x.track_id = t.id
            WHERE x.provider = $1 AND x.external_id = $2
            "#,
        )
        .bind(provider)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TrackRow::into_model).transpose()
    }

    async fn find_track_by_isrc(&self, isrc: &str) -> StoreResult<Option<CanonicalTrack>> {
        let row = sqlx::query_as::<_, TrackRow>(
            "SELECT id, title, normalized_title, primary_artist_id, duration_seconds, isrc, external_ids, \
                    bpm, musical_key, energy, genre, label, release_date \
             FROM silver_tracks WHERE isrc = $1",
        )
        .bind(isrc)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TrackRow::into_model).transpose()
    }

    async fn tracks_by_artist(&self, artist_id: Uuid) -> StoreResult<Vec<CanonicalTrack>> {
        let rows = sqlx::query_as::<_, TrackRow>(
            "SELECT id, title, normalized_title, primary_artist_id, duration_seconds, isrc, external_ids, \
                    bpm, musical_key, energy, genre, label, release_date \
             FROM silver_tracks WHERE primary_artist_id = $1",
        )
        .bind(artist_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TrackRow::into_model).collect()
    }

    async fn insert_track(&self, track: &CanonicalTrack) -> StoreResult<()> {
        let external_ids = serde_json::to_value(&track.external_ids)
            .map_err(|e| StoreError::Other(anyhow!(e)))?;
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO silver_tracks
                (id, title, normalized_title, primary_artist_id, duration_seconds, isrc, external_ids,
                 bpm, musical_key, energy, genre, label, release_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(track.id)
        .bind(&track.title)
        .bind(&track.normalized_title)
        .bind(track.primary_artist_id)
        .bind(track.duration_seconds)
        .bind(&track.isrc)
        .bind(external_ids)
        .bind(track.bpm)
        .bind(&track.musical_key)
        .bind(track.energy)
        .bind(&track.genre)
        .bind(&track.label)
        .bind(track.release_date)
        .execute(&mut *tx)
        .await?;

        for (provider, id) in track.external_ids.pairs() {
            sqlx::query(
                "INSERT INTO silver_track_external_ids (provider, external_id, track_id) \
                 VALUES ($1, $2, $3) ON CONFLICT (provider, external_id) DO NOTHING",
            )
            .bind(provider)
            .bind(id)
            .bind(track.id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_track(&self, track: &CanonicalTrack) -> StoreResult<()> {
        let external_ids = serde_json::to_value(&track.external_ids)
            .map_err(|e| StoreError::Other(anyhow!(e)))?;
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE silver_tracks SET
                title = $2, normalized_title = $3, duration_seconds = $4, isrc = $5,
                external_ids = $6, bpm = $7, musical_key = $8, energy = $9,
                genre = $10, label = $11, release_date = $12
            WHERE id = $1
            "#,
        )
        .bind(track.id)
        .bind(&track.title)
        .bind(&track.normalized_title)
        .bind(track.duration_seconds)
        .bind(&track.isrc)
        .bind(external_ids)
        .bind(track.bpm)
        .bind(&track.musical_key)
        .bind(track.energy)
        .bind(&track.genre)
        .bind(&track.label)
        .bind(track.release_date)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("track {}", track.id)));
        }

        for (provider, id) in track.external_ids.pairs() {
            sqlx::query(
                "INSERT INTO silver_track_external_ids (provider, external_id, track_id) \
                 VALUES ($1, $2, $3) ON CONFLICT (provider, external_id) DO NOTHING",
            )
            .bind(provider)
            .bind(id)
            .bind(track.id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn upsert_playlist(&self, playlist: &CanonicalPlaylist) -> StoreResult<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO silver_playlists
                (id, source, source_url, event_name, dj_artist_id, event_date, venue)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (source_url) DO UPDATE SET
                event_name = EXCLUDED.event_name,
                dj_artist_id = EXCLUDED.dj_artist_id,
                event_date = EXCLUDED.event_date,
                venue = EXCLUDED.venue
            RETURNING id
            "#,
        )
        .bind(playlist.id)
        .bind(playlist.source.as_str())
        .bind(&playlist.source_url)
        .bind(&playlist.event_name)
        .bind(playlist.dj_artist_id)
        .bind(playlist.event_date)
        .bind(&playlist.venue)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn get_playlist(&self, id: Uuid) -> StoreResult<Option<CanonicalPlaylist>> {
        let row = sqlx::query_as::<_, SilverPlaylistRow>(
            "SELECT id, source, source_url, event_name, dj_artist_id, event_date, venue \
             FROM silver_playlists WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(SilverPlaylistRow::into_model).transpose()
    }

    async fn replace_playlist_projection(
        &self,
        playlist_id: Uuid,
        entries: &[PlaylistTrackEntry],
        observations: &[AdjacencyObservation],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM silver_playlist_tracks WHERE canonical_playlist_id = $1")
            .bind(playlist_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM silver_adjacency_observations WHERE canonical_playlist_id = $1")
            .bind(playlist_id)
            .execute(&mut *tx)
            .await?;

        for entry in entries {
            sqlx::query(
                "INSERT INTO silver_playlist_tracks (canonical_playlist_id, position, canonical_track_id) \
                 VALUES ($1, $2, $3)",
            )
            .bind(playlist_id)
            .bind(entry.position)
            .bind(entry.canonical_track_id)
            .execute(&mut *tx)
            .await?;
        }

        for observation in observations {
            sqlx::query(
                "INSERT INTO silver_adjacency_observations \
                     (canonical_playlist_id, position, source_track_id, target_track_id) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(playlist_id)
            .bind(observation.position)
            .bind(observation.source_track_id)
            .bind(observation.target_track_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn observations_for_playlist(
        &self,
        playlist_id: Uuid,
    ) -> StoreResult<Vec<AdjacencyObservation>> {
        let rows = sqlx::query_as::<_, AdjacencyObservation>(
            "SELECT canonical_playlist_id, position, source_track_id, target_track_id \
             FROM silver_adjacency_observations WHERE canonical_playlist_id = $1 ORDER BY position",
        )
        .bind(playlist_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn all_observations(&self) -> StoreResult<Vec<AdjacencyObservation>> {
        let rows = sqlx::query_as::<_, AdjacencyObservation>(
            "SELECT canonical_playlist_id, position, source_track_id, target_track_id \
             FROM silver_adjacency_observations",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn observations_for_pair(
        &self,
        source_track_id: Uuid,
        target_track_id: Uuid,
    ) -> StoreResult<Vec<AdjacencyObservation>> {
        let rows = sqlx::query_as::<_, AdjacencyObservation>(
            "SELECT canonical_playlist_id, position, source_track_id, target_track_id \
             FROM silver_adjacency_observations WHERE source_track_id = $1 AND target_track_id = $2",
        )
        .bind(source_track_id)
        .bind(target_track_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn track_appearance_counts(&self) -> StoreResult<HashMap<Uuid, i64>> {
        let rows: Vec<(Uuid, i64)> = sqlx::query_as(
            "SELECT canonical_track_id, COUNT(DISTINCT canonical_playlist_id) \
             FROM silver_playlist_tracks GROUP BY canonical_track_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }
}

#[async_trait]
impl GoldStore for PostgresStore {
    async fn get_transition(
        &self,
        source_track_id: Uuid,
        target_track_id: Uuid,
    ) -> StoreResult<Option<Transition>> {
        let row = sqlx::query_as::<_, TransitionRow>(
            "SELECT id, source_track_id, target_track_id, occurrence_count, observing_playlist_ids, \
                    last_observed_at, bpm_delta_avg, key_compat_rate, energy_delta_avg, confidence, quality \
             FROM gold_transitions WHERE source_track_id = $1 AND target_track_id = $2",
        )
        .bind(source_track_id)
        .bind(target_track_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Transition::from))
    }

    async fn upsert_transition(&self, transition: &Transition) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO gold_transitions
                (id, source_track_id, target_track_id, occurrence_count, observing_playlist_ids,
                 last_observed_at, bpm_delta_avg, key_compat_rate, energy_delta_avg, confidence, quality)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (source_track_id, target_track_id) DO UPDATE SET
                occurrence_count = EXCLUDED.occurrence_count,
                observing_playlist_ids = EXCLUDED.observing_playlist_ids,
                last_observed_at = EXCLUDED.last_observed_at,
                bpm_delta_avg = EXCLUDED.bpm_delta_avg,
                key_compat_rate = EXCLUDED.key_compat_rate,
                energy_delta_avg = EXCLUDED.energy_delta_avg,
                confidence = EXCLUDED.confidence,
                quality = EXCLUDED.quality
            "#,
        )
        .bind(transition.id)
        .bind(transition.source_track_id)
        .bind(transition.target_track_id)
        .bind(transition.occurrence_count)
        .bind(&transition.observing_playlist_ids)
        .bind(transition.last_observed_at)
        .bind(transition.metrics.bpm_delta_avg)
        .bind(transition.metrics.key_compat_rate)
        .bind(transition.metrics.energy_delta_avg)
        .bind(transition.metrics.confidence)
        .bind(transition.metrics.quality)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_transition(
        &self,
        source_track_id: Uuid,
        target_track_id: Uuid,
    ) -> StoreResult<()> {
        sqlx::query(
            "DELETE FROM gold_transitions WHERE source_track_id = $1 AND target_track_id = $2",
        )
        .bind(source_track_id)
        .bind(target_track_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn all_transitions(&self) -> StoreResult<Vec<Transition>> {
        let rows = sqlx::query_as::<_, TransitionRow>(
            "SELECT id, source_track_id, target_track_id, occurrence_count, observing_playlist_ids, \
                    last_observed_at, bpm_delta_avg, key_compat_rate, energy_delta_avg, confidence, quality \
             FROM gold_transitions",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Transition::from).collect())
    }

    async fn replace_track_stats(&self, stats: &[TrackStats]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM gold_track_stats")
            .execute(&mut *tx)
            .await?;
        for s in stats {
            sqlx::query(
                "INSERT INTO gold_track_stats (track_id, appearance_count, in_degree, out_degree, popularity) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(s.track_id)
            .bind(s.appearance_count)
            .bind(s.in_degree)
            .bind(s.out_degree)
            .bind(s.popularity)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn all_track_stats(&self) -> StoreResult<Vec<TrackStats>> {
        let rows = sqlx::query_as::<_, TrackStatsRow>(
            "SELECT track_id, appearance_count, in_degree, out_degree, popularity FROM gold_track_stats",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(TrackStats::from).collect())
    }
}

#[async_trait]
impl OperationalStore for PostgresStore {
    async fn replace_graph(&self, snapshot: &GraphSnapshot) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM operational_edges")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM operational_nodes")
            .execute(&mut *tx)
            .await?;

        for node in &snapshot.nodes {
            sqlx::query(
                r#"
                INSERT INTO operational_nodes
                    (id, label, artist, title, bpm, musical_key, popularity, appearance_count)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(node.id)
            .bind(&node.label)
            .bind(&node.attributes.artist)
            .bind(&node.attributes.title)
            .bind(node.attributes.bpm)
            .bind(&node.attributes.musical_key)
            .bind(node.attributes.popularity)
            .bind(node.attributes.appearance_count)
            .execute(&mut *tx)
            .await?;
        }

        for edge in &snapshot.edges {
            sqlx::query(
                r#"
                INSERT INTO operational_edges
                    (source_id, target_id, weight, confidence, quality, avg_bpm_delta)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(edge.source_id)
            .bind(edge.target_id)
            .bind(edge.weight)
            .bind(edge.attributes.confidence)
            .bind(edge.attributes.quality)
            .bind(edge.attributes.avg_bpm_delta)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn graph(&self) -> StoreResult<GraphSnapshot> {
        let node_rows = sqlx::query_as::<_, NodeRow>(
            "SELECT id, label, artist, title, bpm, musical_key, popularity, appearance_count \
             FROM operational_nodes",
        )
        .fetch_all(&self.pool)
        .await?;
        let edge_rows = sqlx::query_as::<_, EdgeRow>(
            "SELECT source_id, target_id, weight, confidence, quality, avg_bpm_delta \
             FROM operational_edges",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(GraphSnapshot {
            nodes: node_rows
                .into_iter()
                .map(|row| GraphNode {
                    id: row.id,
                    label: row.label,
                    attributes: NodeAttributes {
                        artist: row.artist,
                        title: row.title,
                        bpm: row.bpm,
                        musical_key: row.musical_key,
                        popularity: row.popularity,
                        appearance_count: row.appearance_count,
                    },
                })
                .collect(),
            edges: edge_rows
                .into_iter()
                .map(|row| GraphEdge {
                    source_id: row.source_id,
                    target_id: row.target_id,
                    weight: row.weight,
                    attributes: EdgeAttributes {
                        confidence: row.confidence,
                        quality: row.quality,
                        avg_bpm_delta: row.avg_bpm_delta,
                    },
                })
                .collect(),
        })
    }
}
