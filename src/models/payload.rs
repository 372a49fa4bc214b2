//! Uniform shapes produced by the source adapters.
//!
//! Adapters translate site-specific HTML/JSON into these records; positions
//! are assigned later by the Bronze writer from list order.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::scrape::SourceSite;
use super::silver::ExternalIds;

/// A playlist URL discovered by an adapter search, with whatever metadata
/// the result listing exposed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistCandidate {
    pub url: String,
    #[serde(default)]
    pub hint_metadata: CandidateHints,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateHints {
    pub event_name: Option<String>,
    pub dj_name: Option<String>,
    pub event_date: Option<NaiveDate>,
}

/// Playlist-level metadata parsed from the source page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaylistMeta {
    pub external_id: Option<String>,
    pub event_name: Option<String>,
    pub dj_name: Option<String>,
    pub venue: Option<String>,
    pub event_date: Option<NaiveDate>,
}

/// Per-track hints an adapter scraped opportunistically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackHints {
    pub duration_seconds: Option<i32>,
    pub label: Option<String>,
    pub bpm: Option<f64>,
    pub musical_key: Option<String>,
    pub genre: Option<String>,
    pub isrc: Option<String>,
    #[serde(default)]
    pub external_ids: ExternalIds,
}

/// One track mention in document order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackRecord {
    pub artist: Option<String>,
    pub title: Option<String>,
    /// Position the source document declared, when it declared one.
    /// Authoritative positions are always assigned from list order; a
    /// declared position that disagrees with it rejects the payload.
    #[serde(default)]
    pub source_position: Option<i32>,
    #[serde(default)]
    pub hints: TrackHints,
    /// Verbatim fragment the track was parsed from.
    pub raw_blob: serde_json::Value,
}

impl TrackRecord {
    pub fn new(artist: impl Into<String>, title: impl Into<String>) -> Self {
        let artist = artist.into();
        let title = title.into();
        let raw_blob = serde_json::json!({ "artist": artist, "title": title });
        Self {
            artist: Some(artist),
            title: Some(title),
            source_position: None,
            hints: TrackHints::default(),
            raw_blob,
        }
    }

    pub fn with_source_position(mut self, position: i32) -> Self {
        self.source_position = Some(position);
        self
    }
}

/// A complete ordered tracklist plus playlist metadata, as fetched from one
/// source URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistPayload {
    pub source: SourceSite,
    pub source_url: String,
    pub meta: PlaylistMeta,
    /// Document order; never reordered downstream.
    pub tracks_in_order: Vec<TrackRecord>,
    /// Complete unparsed payload, preserved for reprocessing.
    pub raw_blob: serde_json::Value,
}

impl PlaylistPayload {
    pub fn new(source: SourceSite, source_url: impl Into<String>) -> Self {
        Self {
            source,
            source_url: source_url.into(),
            meta: PlaylistMeta::default(),
            tracks_in_order: Vec::new(),
            raw_blob: serde_json::Value::Null,
        }
    }

    pub fn with_tracks(mut self, tracks: Vec<TrackRecord>) -> Self {
        self.tracks_in_order = tracks;
        self
    }
}
