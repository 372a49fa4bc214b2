//! 1001Tracklists adapter.
//!
//! Tracklist pages carry one item container per played track with the
//! combined credit in a value span; search results are anchor rows.

use async_trait::async_trait;
use scraper::{Html, Selector};

use crate::models::{
    CandidateHints, PlaylistCandidate, PlaylistMeta, PlaylistPayload, SourceSite, TrackRecord,
};
use crate::services::fetch::{FetchError, FetchRequest, FetchService};

use super::{split_artist_title, FetchPolicy, SourceAdapter};

const DEFAULT_BASE_URL: &str = "https://www.1001tracklists.com";

pub struct Tracklists1001Adapter {
    fetch: FetchService,
    base_url: String,
}

impl Tracklists1001Adapter {
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

    fn search_url(&self, query: &str) -> String {
        format!(
            "{}/search/result.php?search_value={}",
            self.base_url,
            urlencoding::encode(query)
        )
    }

    fn parse_search(&self, body: &str, limit: usize) -> Vec<PlaylistCandidate> {
        let document = Html::parse_document(body);
        let row_selector = Selector::parse("div.bItm a.bLink").expect("static selector");

        document
            .select(&row_selector)
            .filter_map(|link| {
                let href = link.value().attr("href")?;
                if !href.contains("/tracklist/") {
                    return None;
                }
                let label = link.text().collect::<String>();
                let url = if href.starts_with("http") {
                    href.to_string()
                } else {
                    format!("{}{}", self.base_url, href)
                };
                Some(PlaylistCandidate {
                    url,
                    hint_metadata: CandidateHints {
                        event_name: Some(label.trim().to_string()).filter(|l| !l.is_empty()),
                        ..CandidateHints::default()
                    },
                })
            })
            .take(limit)
            .collect()
    }

    fn parse_playlist(&self, body: &str, url: &str) -> Result<PlaylistPayload, FetchError> {
        let document = Html::parse_document(body);

        let item_selector = Selector::parse("div.tlpItem").expect("static selector");
        let value_selector = Selector::parse("span.trackValue").expect("static selector");
        let bpm_selector = Selector::parse("span.tlBpm").expect("static selector");
        let key_selector = Selector::parse("span.tlKey").expect("static selector");
        let label_selector = Selector::parse("span.tlLabel").expect("static selector");
        let title_selector = Selector::parse("h1#pageTitle").expect("static selector");
        let dj_selector = Selector::parse("h1#pageTitle a.djName").expect("static selector");

        let mut tracks = Vec::new();
        for item in document.select(&item_selector) {
            let Some(value) = item.select(&value_selector).next() else {
                continue;
            };
            let credit = value.text().collect::<String>();
            let (artist, title) = split_artist_title(&credit);

            let mut record = TrackRecord {
                artist,
                title,
                source_position: None,
                hints: Default::default(),
                raw_blob: serde_json::json!({ "text": credit.trim() }),
            };
            record.hints.bpm = item
                .select(&bpm_selector)
                .next()
                .and_then(|b| b.text().collect::<String>().trim().parse().ok());
            record.hints.musical_key = item
                .select(&key_selector)
                .next()
                .map(|k| k.text().collect::<String>().trim().to_string())
                .filter(|k| !k.is_empty());
            record.hints.label = item
                .select(&label_selector)
                .next()
                .map(|l| l.text().collect::<String>().trim().to_string())
                .filter(|l| !l.is_empty());
            tracks.push(record);
        }

        if tracks.is_empty() {
            return Err(FetchError::Malformed {
                message: "no tracklist items on page".to_string(),
            });
        }

        let event_name = document
            .select(&title_selector)
            .next()
            .map(|t| t.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty());
        let dj_name = document
            .select(&dj_selector)
            .next()
            .map(|d| d.text().collect::<String>().trim().to_string())
            .filter(|d| !d.is_empty());

        Ok(PlaylistPayload {
            source: SourceSite::Tracklists1001,
            source_url: url.to_string(),
            meta: PlaylistMeta {
                event_name,
                dj_name,
                ..PlaylistMeta::default()
            },
            tracks_in_order: tracks,
            raw_blob: serde_json::json!({ "html": body }),
        })
    }
}

#[async_trait]
impl SourceAdapter for Tracklists1001Adapter {
    fn site(&self) -> SourceSite {
        SourceSite::Tracklists1001
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        policy: FetchPolicy,
    ) -> Result<Vec<PlaylistCandidate>, FetchError> {
        let mut request = FetchRequest::new(self.search_url(query)).with_max_retries(policy.max_retries);
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
