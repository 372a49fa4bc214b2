//! MixesDB adapter.
//!
//! MixesDB is a MediaWiki install; search results come from the wiki search
//! page and tracklists live in an ordered list inside the mix page body.

use async_trait::async_trait;
use scraper::{Html, Selector};

use crate::models::{
    CandidateHints, PlaylistCandidate, PlaylistMeta, PlaylistPayload, SourceSite, TrackRecord,
};
use crate::services::fetch::{FetchError, FetchRequest, FetchService};

use super::{split_artist_title, FetchPolicy, SourceAdapter};

const DEFAULT_BASE_URL: &str = "https://www.mixesdb.com";

pub struct MixesDbAdapter {
    fetch: FetchService,
    base_url: String,
}

impl MixesDbAdapter {
    pub fn new(fetch: FetchService) -> Self {
        Self {
            fetch,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the adapter at a different host (mock servers in tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn search_url(&self, query: &str, limit: usize) -> String {
        format!(
            "{}/db/index.php?title=Special:Search&search={}&limit={}",
            self.base_url,
            urlencoding::encode(query),
            limit
        )
    }

    fn parse_search(&self, body: &str, limit: usize) -> Vec<PlaylistCandidate> {
        let document = Html::parse_document(body);
        let result_selector =
            Selector::parse("ul.mw-search-results li .mw-search-result-heading a").expect("static selector");

        document
            .select(&result_selector)
            .filter_map(|link| {
                let href = link.value().attr("href")?;
                let title = link.text().collect::<String>();
                let url = if href.starts_with("http") {
                    href.to_string()
                } else {
                    format!("{}{}", self.base_url, href)
                };
                Some(PlaylistCandidate {
                    url,
                    hint_metadata: CandidateHints {
                        event_name: Some(title.trim().to_string()).filter(|t| !t.is_empty()),
                        ..CandidateHints::default()
                    },
                })
            })
            .take(limit)
            .collect()
    }

    fn parse_playlist(&self, body: &str, url: &str) -> Result<PlaylistPayload, FetchError> {
        let document = Html::parse_document(body);

        let heading_selector = Selector::parse("h1#firstHeading").expect("static selector");
        let track_selector = Selector::parse("div.list-track ol li").expect("static selector");
        let duration_selector = Selector::parse("span.dur").expect("static selector");

        let mut tracks = Vec::new();
        for item in document.select(&track_selector) {
            let duration = item
                .select(&duration_selector)
                .next()
                .map(|d| d.text().collect::<String>());
            let credit: String = item
                .text()
                .collect::<String>()
                .replace(duration.as_deref().unwrap_or(""), "");
            let (artist, title) = split_artist_title(&credit);
            let mut record = TrackRecord {
                artist,
                title,
                source_position: None,
                hints: Default::default(),
                raw_blob: serde_json::json!({ "text": credit.trim() }),
            };
            record.hints.duration_seconds =
                duration.as_deref().and_then(super::parse_duration_seconds);
            tracks.push(record);
        }

        if tracks.is_empty() {
            return Err(FetchError::Malformed {
                message: "no tracklist container on page".to_string(),
            });
        }

        // "Artist @ Event (Venue) - 2024-06-01" style page titles.
        let heading = document
            .select(&heading_selector)
            .next()
            .map(|h| h.text().collect::<String>())
            .unwrap_or_default();
        let meta = parse_heading(&heading);

        Ok(PlaylistPayload {
            source: SourceSite::MixesDb,
            source_url: url.to_string(),
            meta,
            tracks_in_order: tracks,
            raw_blob: serde_json::json!({ "html": body }),
        })
    }
}

fn parse_heading(heading: &str) -> PlaylistMeta {
    let cleaned = heading.trim();
    if cleaned.is_empty() {
        return PlaylistMeta::default();
    }

    let mut meta = PlaylistMeta {
        event_name: Some(cleaned.to_string()),
        ..PlaylistMeta::default()
    };
    if let Some((dj, event)) = cleaned.split_once(" @ ") {
        meta.dj_name = Some(dj.trim().to_string());
        meta.event_name = Some(event.trim().to_string());
    }
    meta
}

#[async_trait]
impl SourceAdapter for MixesDbAdapter {
    fn site(&self) -> SourceSite {
        SourceSite::MixesDb
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
        Ok(self.parse_search(&response.body, limit))
    }

    async fn fetch(&self, url: &str, policy: FetchPolicy) -> Result<PlaylistPayload, FetchError> {
        let mut request = FetchRequest::new(url).with_max_retries(policy.max_retries);
        if let Some(deadline) = policy.deadline {
            request = request.with_deadline(deadline);
        }
        let response = self.fetch.get(request).await?;
        self.parse_playlist(&response.body, url)
    }
}
