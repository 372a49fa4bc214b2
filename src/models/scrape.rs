//! Wire shapes for the unified scraping ingress.
//!
//! These are the authoritative request/response schemas served by the
//! dispatcher HTTP surface; field names and defaults are part of the
//! external contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The source sites the dispatcher can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceSite {
    #[serde(rename = "mixesdb")]
    MixesDb,
    #[serde(rename = "1001tracklists")]
    Tracklists1001,
    #[serde(rename = "beatport")]
    Beatport,
    #[serde(rename = "setlistfm")]
    SetlistFm,
    #[serde(rename = "reddit")]
    Reddit,
    #[serde(rename = "discogs")]
    Discogs,
}

impl SourceSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MixesDb => "mixesdb",
            Self::Tracklists1001 => "1001tracklists",
            Self::Beatport => "beatport",
            Self::SetlistFm => "setlistfm",
            Self::Reddit => "reddit",
            Self::Discogs => "discogs",
        }
    }

    pub fn all() -> [SourceSite; 6] {
        [
            Self::MixesDb,
            Self::Tracklists1001,
            Self::Beatport,
            Self::SetlistFm,
            Self::Reddit,
            Self::Discogs,
        ]
    }
}

impl fmt::Display for SourceSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceSite {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mixesdb" => Ok(Self::MixesDb),
            "1001tracklists" => Ok(Self::Tracklists1001),
            "beatport" => Ok(Self::Beatport),
            "setlistfm" => Ok(Self::SetlistFm),
            "reddit" => Ok(Self::Reddit),
            "discogs" => Ok(Self::Discogs),
            other => Err(format!("unknown source: {}", other)),
        }
    }
}

/// Per-request options with contract defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeOptions {
    #[serde(default = "ScrapeOptions::default_enable_enrichment")]
    pub enable_enrichment: bool,
    #[serde(default = "ScrapeOptions::default_max_retries")]
    pub max_retries: u32,
    /// Overall request timeout in seconds.
    #[serde(rename = "timeout", default = "ScrapeOptions::default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl ScrapeOptions {
    fn default_enable_enrichment() -> bool {
        true
    }

    fn default_max_retries() -> u32 {
        3
    }

    fn default_timeout_seconds() -> u64 {
        300
    }
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            enable_enrichment: Self::default_enable_enrichment(),
            max_retries: Self::default_max_retries(),
            timeout_seconds: Self::default_timeout_seconds(),
        }
    }
}

/// A scrape request submitted to `POST /scrape`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRequest {
    pub source: SourceSite,
    /// Combined free-text search form, e.g. `"Adam Beyer Your Mind"`.
    pub search_query: String,
    /// Metadata only; never used for routing or splitting.
    #[serde(default)]
    pub target_artist: Option<String>,
    #[serde(default)]
    pub target_title: Option<String>,
    #[serde(default = "ScrapeRequest::default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub options: ScrapeOptions,
}

impl ScrapeRequest {
    fn default_limit() -> usize {
        10
    }

    pub fn new(source: SourceSite, search_query: impl Into<String>) -> Self {
        Self {
            source,
            search_query: search_query.into(),
            target_artist: None,
            target_title: None,
            limit: Self::default_limit(),
            options: ScrapeOptions::default(),
        }
    }

    /// Structural validation of the request body.
    pub fn validate(&self) -> Result<(), String> {
        if self.search_query.trim().is_empty() {
            return Err("search_query must not be empty".to_string());
        }
        if self.limit < 1 || self.limit > 1000 {
            return Err(format!("limit must be within 1..1000, got {}", self.limit));
        }
        if self.options.timeout_seconds == 0 {
            return Err("options.timeout must be at least 1 second".to_string());
        }
        Ok(())
    }
}

/// Terminal status of a scrape request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeStatus {
    Completed,
    Partial,
    Failed,
    Timeout,
}

/// Error taxonomy surfaced per URL in a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeErrorKind {
    NotFound,
    Blocked,
    RateLimited,
    Malformed,
    Transient,
    Unsolvable,
    DeadlineExceeded,
    Cancelled,
    InvalidPayload,
    Internal,
}

impl ScrapeErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Blocked => "blocked",
            Self::RateLimited => "rate_limited",
            Self::Malformed => "malformed",
            Self::Transient => "transient",
            Self::Unsolvable => "unsolvable",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Cancelled => "cancelled",
            Self::InvalidPayload => "invalid_payload",
            Self::Internal => "internal",
        }
    }
}

/// A structured per-URL failure recorded in a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeErrorEntry {
    pub url: String,
    pub kind: ScrapeErrorKind,
    pub message: String,
}

/// Outcome of one scrape request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeReport {
    pub status: ScrapeStatus,
    pub playlists_scraped: usize,
    pub tracks_extracted: usize,
    pub transitions_created: usize,
    pub errors: Vec<ScrapeErrorEntry>,
    pub bronze_playlist_ids: Vec<Uuid>,
    pub execution_seconds: f64,
}

/// A currently executing request, surfaced by `GET /jobs`.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub id: Uuid,
    pub source: SourceSite,
    pub search_query: String,
    pub limit: usize,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub urls_completed: usize,
}
