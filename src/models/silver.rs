//! Silver layer rows: canonical artists, tracks, playlists and the
//! adjacency observations derived from them.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::scrape::SourceSite;

/// Cross-source identifiers for a canonical entity. Each id is independently
/// unique when present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIds {
    pub spotify: Option<String>,
    pub apple: Option<String>,
    pub youtube: Option<String>,
    pub beatport: Option<String>,
    pub discogs: Option<String>,
    pub musicbrainz: Option<String>,
}

impl ExternalIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_spotify(mut self, id: impl Into<String>) -> Self {
        self.spotify = Some(id.into());
        self
    }

    pub fn with_beatport(mut self, id: impl Into<String>) -> Self {
        self.beatport = Some(id.into());
        self
    }

    pub fn with_discogs(mut self, id: impl Into<String>) -> Self {
        self.discogs = Some(id.into());
        self
    }

    pub fn with_musicbrainz(mut self, id: impl Into<String>) -> Self {
        self.musicbrainz = Some(id.into());
        self
    }

    /// All `(provider, id)` pairs that are present.
    pub fn pairs(&self) -> Vec<(&'static str, &str)> {
        let mut out = Vec::new();
        if let Some(v) = &self.spotify {
            out.push(("spotify", v.as_str()));
        }
        if let Some(v) = &self.apple {
            out.push(("apple", v.as_str()));
        }
        if let Some(v) = &self.youtube {
            out.push(("youtube", v.as_str()));
        }
        if let Some(v) = &self.beatport {
            out.push(("beatport", v.as_str()));
        }
        if let Some(v) = &self.discogs {
            out.push(("discogs", v.as_str()));
        }
        if let Some(v) = &self.musicbrainz {
            out.push(("musicbrainz", v.as_str()));
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.pairs().is_empty()
    }

    /// Merge `other` into self without overwriting present values.
    pub fn merge(&mut self, other: &ExternalIds) {
        if self.spotify.is_none() {
            self.spotify = other.spotify.clone();
        }
        if self.apple.is_none() {
            self.apple = other.apple.clone();
        }
        if self.youtube.is_none() {
            self.youtube = other.youtube.clone();
        }
        if self.beatport.is_none() {
            self.beatport = other.beatport.clone();
        }
        if self.discogs.is_none() {
            self.discogs = other.discogs.clone();
        }
        if self.musicbrainz.is_none() {
            self.musicbrainz = other.musicbrainz.clone();
        }
    }
}

/// A deduplicated artist identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalArtist {
    pub id: Uuid,
    pub canonical_name: String,
    /// Unique lookup key: trimmed, lowercased, diacritics stripped.
    pub normalized_name: String,
    pub aliases: Vec<String>,
    pub external_ids: ExternalIds,
    pub country: Option<String>,
    pub genres: Vec<String>,
}

impl CanonicalArtist {
    pub fn new(canonical_name: impl Into<String>, normalized_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            canonical_name: canonical_name.into(),
            normalized_name: normalized_name.into(),
            aliases: Vec::new(),
            external_ids: ExternalIds::default(),
            country: None,
            genres: Vec::new(),
        }
    }
}

/// A deduplicated track identity that all raw mentions map to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalTrack {
    pub id: Uuid,
    pub title: String,
    pub normalized_title: String,
    pub primary_artist_id: Uuid,
    pub duration_seconds: Option<i32>,
    pub isrc: Option<String>,
    pub external_ids: ExternalIds,
    pub bpm: Option<f64>,
    pub musical_key: Option<String>,
    pub energy: Option<f64>,
    pub genre: Option<String>,
    pub label: Option<String>,
    pub release_date: Option<NaiveDate>,
}

impl CanonicalTrack {
    pub fn new(
        title: impl Into<String>,
        normalized_title: impl Into<String>,
        primary_artist_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            normalized_title: normalized_title.into(),
            primary_artist_id,
            duration_seconds: None,
            isrc: None,
            external_ids: ExternalIds::default(),
            bpm: None,
            musical_key: None,
            energy: None,
            genre: None,
            label: None,
            release_date: None,
        }
    }
}

/// A canonicalized playlist, keyed by its source URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalPlaylist {
    pub id: Uuid,
    pub source: SourceSite,
    pub source_url: String,
    pub event_name: Option<String>,
    pub dj_artist_id: Option<Uuid>,
    pub event_date: Option<NaiveDate>,
    pub venue: Option<String>,
}

/// Resolved membership of a track at a position within a canonical playlist.
/// Unresolved positions carry no row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PlaylistTrackEntry {
    pub canonical_playlist_id: Uuid,
    pub position: i32,
    pub canonical_track_id: Uuid,
}

/// One proven consecutive transition inside a single playlist.
///
/// Exists only when both endpoints resolved to canonical tracks whose
/// primary artists pass the sentinel filter. Unique on
/// `(canonical_playlist_id, position)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct AdjacencyObservation {
    pub canonical_playlist_id: Uuid,
    pub position: i32,
    pub source_track_id: Uuid,
    pub target_track_id: Uuid,
}

/// Why a consecutive pair did not yield an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObservationDropReason {
    UnresolvedEndpoint,
    SentinelArtist,
    MissingRawFields,
}

impl ObservationDropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnresolvedEndpoint => "unresolved_endpoint",
            Self::SentinelArtist => "sentinel_artist",
            Self::MissingRawFields => "missing_raw_fields",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_never_overwrites_present_ids() {
        let mut ids = ExternalIds::new().with_spotify("abc");
        let other = ExternalIds::new().with_spotify("zzz").with_beatport("42");
        ids.merge(&other);
        assert_eq!(ids.spotify.as_deref(), Some("abc"));
        assert_eq!(ids.beatport.as_deref(), Some("42"));
    }

    #[test]
    fn pairs_reflects_present_ids_only() {
        let ids = ExternalIds::new().with_discogs("d1").with_musicbrainz("mb1");
        let pairs = ids.pairs();
        assert_eq!(pairs.len(), 2);
        assert!(pairs.contains(&("discogs", "d1")));
        assert!(!ids.is_empty());
        assert!(ExternalIds::new().is_empty());
    }
}
