//! Discogs adapter.
//!
//! Talks to the public REST API rather than scraping HTML. Mix compilations
//! and DJ releases carry an ordered tracklist with per-track artist credits,
//! durations and the release-level label, all of which become hints.

use async_trait::async_trait;
use serde::Deserialize;

use crate::models::{
    CandidateHints, PlaylistCandidate, PlaylistMeta, PlaylistPayload, SourceSite, TrackRecord,
};
use crate::services::fetch::{FetchError, FetchRequest, FetchService};

use super::{parse_duration_seconds, split_artist_title, FetchPolicy, SourceAdapter};

const DEFAULT_BASE_URL: &str = "https://api.discogs.com";

pub struct DiscogsAdapter {
    fetch: FetchService,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    resource_url: String,
    title: String,
    #[serde(default)]
    year: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Release {
    id: i64,
    title: String,
    #[serde(default)]
    artists: Vec<Credit>,
    #[serde(default)]
    labels: Vec<Label>,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    genres: Vec<String>,
    #[serde(default)]
    tracklist: Vec<ReleaseTrack>,
}

#[derive(Debug, Deserialize)]
struct Credit {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Label {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ReleaseTrack {
    #[serde(default)]
    position: String,
    #[serde(default, rename = "type_")]
    kind: Option<String>,
    title: String,
    #[serde(default)]
    duration: String,
    #[serde(default)]
    artists: Vec<Credit>,
}

impl DiscogsAdapter {
    pub fn new(fetch: FetchService) -> Self {
        Self {
            fetch,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn search_url(&self, query: &str, limit: usize) -> String {
        format!(
            "{}/database/search?q={}&type=release&format=Mixed&per_page={}",
            self.base_url,
            urlencoding::encode(query),
            limit
        )
    }

    fn parse_search(&self, body: &str, limit: usize) -> Result<Vec<PlaylistCandidate>, FetchError> {
        let response: SearchResponse =
            serde_json::from_str(body).map_err(|e| FetchError::Malformed {
                message: format!("discogs search decode: {}", e),
            })?;

        Ok(response
            .results
            .into_iter()
            .map(|result| PlaylistCandidate {
                url: result.resource_url,
                hint_metadata: CandidateHints {
                    event_name: Some(result.title),
                    event_date: result
                        .year
                        .as_deref()
                        .and_then(|y| y.parse::<i32>().ok())
                        .and_then(|y| chrono::NaiveDate::from_ymd_opt(y, 1, 1)),
                    ..CandidateHints::default()
                },
            })
            .take(limit)
            .collect())
    }

    fn parse_release(&self, body: &str, url: &str) -> Result<PlaylistPayload, FetchError> {
        let release: Release = serde_json::from_str(body).map_err(|e| FetchError::Malformed {
            message: format!("discogs release decode: {}", e),
        })?;

        let release_artist = release
            .artists
            .first()
            .map(|a| a.name.clone())
            .filter(|a| !a.is_empty());
        let label = release.labels.first().map(|l| l.name.clone());
        let genre = release.genres.first().cloned();

        let mut tracks = Vec::new();
        for entry in release
            .tracklist
            .iter()
            .filter(|t| t.kind.as_deref().unwrap_or("track") == "track")
        {
            // Per-track credits win over the release artist; plain "Artist -
            // Title" titles are split when neither credit exists.
            let (mut artist, mut title) = (
                entry.artists.first().map(|a| a.name.clone()),
                Some(entry.title.clone()).filter(|t| !t.is_empty()),
            );
            if artist.is_none() {
                if let Some(full) = &title {
                    if full.contains(" - ") {
                        let (split_artist, split_title) = split_artist_title(full);
                        artist = split_artist;
                        title = split_title;
                    }
                }
            }
            if artist.is_none() {
                artist = release_artist.clone();
            }

            let mut record = TrackRecord {
                artist,
                title,
                source_position: entry.position.parse::<i32>().ok(),
                hints: Default::default(),
                raw_blob: serde_json::json!({
                    "position": entry.position,
                    "title": entry.title,
                    "duration": entry.duration,
                }),
            };
            record.hints.duration_seconds = parse_duration_seconds(&entry.duration);
            record.hints.label = label.clone();
            record.hints.genre = genre.clone();
            tracks.push(record);
        }

        if tracks.is_empty() {
            return Err(FetchError::Malformed {
                message: "release has no tracklist".to_string(),
            });
        }

        Ok(PlaylistPayload {
            source: SourceSite::Discogs,
            source_url: url.to_string(),
            meta: PlaylistMeta {
                external_id: Some(release.id.to_string()),
                event_name: Some(release.title),
                dj_name: release_artist,
                event_date: release
                    .year
                    .and_then(|y| chrono::NaiveDate::from_ymd_opt(y, 1, 1)),
                ..PlaylistMeta::default()
            },
            tracks_in_order: tracks,
            raw_blob: serde_json::from_str(body).unwrap_or(serde_json::Value::Null),
        })
    }
}

#[async_trait]
impl SourceAdapter for DiscogsAdapter {
    fn site(&self) -> SourceSite {
        SourceSite::Discogs
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        policy: FetchPolicy,
    ) -> Result<Vec<PlaylistCandidate>, FetchError> {
        let mut request =
            FetchRequest::new(self.search_url(query, limit)).with_max_retries(policy.max_retries);
        if let Some(deadline) = policy.deadline {
            request = request.with_deadline(deadline);
        }
        let response = self.fetch.get(request).await?;
        self.parse_search(&response.body, limit)
    }

    async fn fetch(&self, url: &str, policy: FetchPolicy) -> Result<PlaylistPayload, FetchError> {
        let mut request = FetchRequest::new(url).with_max_retries(policy.max_retries);
        if let Some(deadline) = policy.deadline {
            request = request.with_deadline(deadline);
        }
        let response = self.fetch.get(request).await?;
        self.parse_release(&response.body, url)
    }
}
