//! Source adapters: one per site, translating site-specific HTML/JSON into
//! the uniform playlist shape.
//!
//! Adapters own parsing only. Rate limiting, retries, proxy selection and
//! CAPTCHA handling all live in the fetch substrate; an adapter just asks it
//! for pages and turns them into `PlaylistPayload`s.

pub mod beatport;
pub mod discogs;
pub mod mixesdb;
pub mod reddit;
pub mod setlistfm;
pub mod tracklists;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;

use crate::models::{PlaylistCandidate, PlaylistPayload, SourceSite};
use crate::services::fetch::{FetchError, FetchService};

pub use beatport::BeatportAdapter;
pub use discogs::DiscogsAdapter;
pub use mixesdb::MixesDbAdapter;
pub use reddit::RedditAdapter;
pub use setlistfm::SetlistFmAdapter;
pub use tracklists::Tracklists1001Adapter;

/// Per-call fetch policy handed down from the dispatcher.
#[derive(Debug, Clone, Copy)]
pub struct FetchPolicy {
    pub deadline: Option<Instant>,
    pub max_retries: u32,
}

impl FetchPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            deadline: None,
            max_retries,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Uniform contract every source site implements.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn site(&self) -> SourceSite;

    /// Yield candidate playlist URLs for a combined free-text query.
    /// Splitting the query into fields is a site-specific concern.
    async fn search(
        &self,
        query: &str,
        limit: usize,
        policy: FetchPolicy,
    ) -> Result<Vec<PlaylistCandidate>, FetchError>;

    /// Fetch one playlist URL into a complete ordered payload.
    async fn fetch(&self, url: &str, policy: FetchPolicy) -> Result<PlaylistPayload, FetchError>;
}

/// Routing table from source site to adapter.
#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: Arc<HashMap<SourceSite, Arc<dyn SourceAdapter>>>,
}

impl AdapterRegistry {
    /// Registry with every production adapter wired to the shared substrate.
    pub fn with_defaults(fetch: FetchService) -> Self {
        let mut adapters: HashMap<SourceSite, Arc<dyn SourceAdapter>> = HashMap::new();
        adapters.insert(
            SourceSite::MixesDb,
            Arc::new(MixesDbAdapter::new(fetch.clone())),
        );
        adapters.insert(
            SourceSite::Tracklists1001,
            Arc::new(Tracklists1001Adapter::new(fetch.clone())),
        );
        adapters.insert(
            SourceSite::Beatport,
            Arc::new(BeatportAdapter::new(fetch.clone())),
        );
        adapters.insert(
            SourceSite::SetlistFm,
            Arc::new(SetlistFmAdapter::new(fetch.clone())),
        );
        adapters.insert(
            SourceSite::Reddit,
            Arc::new(RedditAdapter::new(fetch.clone())),
        );
        adapters.insert(SourceSite::Discogs, Arc::new(DiscogsAdapter::new(fetch)));
        Self {
            adapters: Arc::new(adapters),
        }
    }

    pub fn empty() -> Self {
        Self {
            adapters: Arc::new(HashMap::new()),
        }
    }

    /// Registry over an explicit adapter set (tests point adapters at mock
    /// servers this way).
    pub fn from_adapters(adapters: Vec<Arc<dyn SourceAdapter>>) -> Self {
        Self {
            adapters: Arc::new(
                adapters
                    .into_iter()
                    .map(|adapter| (adapter.site(), adapter))
                    .collect(),
            ),
        }
    }

    pub fn get(&self, site: SourceSite) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(&site).cloned()
    }

    pub fn sites(&self) -> Vec<SourceSite> {
        self.adapters.keys().copied().collect()
    }
}

/// Split a combined `"Artist - Title"` credit into its halves. Returns
/// trimmed parts; either side may be absent when the separator is missing.
pub(crate) fn split_artist_title(raw: &str) -> (Option<String>, Option<String>) {
    let cleaned = raw.trim();
    if cleaned.is_empty() {
        return (None, None);
    }

    for separator in [" - ", " – ", " — "] {
        if let Some((artist, title)) = cleaned.split_once(separator) {
            let artist = artist.trim();
            let title = title.trim();
            return (
                (!artist.is_empty()).then(|| artist.to_string()),
                (!title.is_empty()).then(|| title.to_string()),
            );
        }
    }

    // No separator: treat the whole credit as a title with unknown artist.
    (None, Some(cleaned.to_string()))
}

/// Parse `"mm:ss"` or `"h:mm:ss"` track durations.
pub(crate) fn parse_duration_seconds(raw: &str) -> Option<i32> {
    let parts: Vec<&str> = raw.trim().split(':').collect();
    let numbers: Option<Vec<i32>> = parts.iter().map(|p| p.parse::<i32>().ok()).collect();
    match numbers?.as_slice() {
        [minutes, seconds] => Some(minutes * 60 + seconds),
        [hours, minutes, seconds] => Some(hours * 3600 + minutes * 60 + seconds),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_handles_common_separators() {
        assert_eq!(
            split_artist_title("Adam Beyer - Your Mind"),
            (Some("Adam Beyer".to_string()), Some("Your Mind".to_string()))
        );
        assert_eq!(
            split_artist_title("Amelie Lens – Contradictions"),
            (
                Some("Amelie Lens".to_string()),
                Some("Contradictions".to_string())
            )
        );
    }

    #[test]
    fn split_without_separator_keeps_title_only() {
        assert_eq!(split_artist_title("ID"), (None, Some("ID".to_string())));
        assert_eq!(split_artist_title("   "), (None, None));
    }

    #[test]
    fn durations_parse_both_forms() {
        assert_eq!(parse_duration_seconds("4:30"), Some(270));
        assert_eq!(parse_duration_seconds("1:02:03"), Some(3723));
        assert_eq!(parse_duration_seconds("n/a"), None);
    }
}
