//! Beatport adapter.
//!
//! DJ charts stand in for playlists. Chart pages expose per-track artist,
//! title, BPM, key and label, plus the Beatport track id as a data
//! attribute, which becomes a strong external id hint downstream.

use async_trait::async_trait;
use scraper::{Html, Selector};

use crate::models::{
    CandidateHints, PlaylistCandidate, PlaylistMeta, PlaylistPayload, SourceSite, TrackRecord,
};
use crate::services::fetch::{FetchError, FetchRequest, FetchService};

use super::{FetchPolicy, SourceAdapter};

const DEFAULT_BASE_URL: &str = "https://www.beatport.com";

pub struct BeatportAdapter {
    fetch: FetchService,
    base_url: String,
}

impl BeatportAdapter {
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
            "{}/search/charts?q={}",
            self.base_url,
            urlencoding::encode(query)
        )
    }

    fn parse_search(&self, body: &str, limit: usize) -> Vec<PlaylistCandidate> {
        let document = Html::parse_document(body);
        let chart_selector = Selector::parse("a.chart-link").expect("static selector");

        document
            .select(&chart_selector)
            .filter_map(|link| {
                let href = link.value().attr("href")?;
                let name = link.text().collect::<String>();
                let url = if href.starts_with("http") {
                    href.to_string()
                } else {
                    format!("{}{}", self.base_url, href)
                };
                Some(PlaylistCandidate {
                    url,
                    hint_metadata: CandidateHints {
                        event_name: Some(name.trim().to_string()).filter(|n| !n.is_empty()),
                        ..CandidateHints::default()
                    },
                })
            })
            .take(limit)
            .collect()
    }

    fn parse_playlist(&self, body: &str, url: &str) -> Result<PlaylistPayload, FetchError> {
        let document = Html::parse_document(body);

        let row_selector = Selector::parse("li.chart-track").expect("static selector");
        let artist_selector = Selector::parse("span.track-artists").expect("static selector");
        let title_selector = Selector::parse("span.track-title").expect("static selector");
        let heading_selector = Selector::parse("h1.chart-title").expect("static selector");
        let curator_selector = Selector::parse("a.chart-curator").expect("static selector");

        let mut tracks = Vec::new();
        for row in document.select(&row_selector) {
            let artist = row
                .select(&artist_selector)
                .next()
                .map(|a| a.text().collect::<String>().trim().to_string())
                .filter(|a| !a.is_empty());
            let title = row
                .select(&title_selector)
                .next()
                .map(|t| t.text().collect::<String>().trim().to_string())
                .filter(|t| !t.is_empty());

            let mut record = TrackRecord {
                artist,
                title,
                source_position: None,
                hints: Default::default(),
                raw_blob: serde_json::json!({ "html": row.html() }),
            };
            record.hints.bpm = row
                .value()
                .attr("data-bpm")
                .and_then(|b| b.parse().ok());
            record.hints.musical_key = row
                .value()
                .attr("data-key")
                .map(str::to_string)
                .filter(|k| !k.is_empty());
            record.hints.label = row
                .value()
                .attr("data-label")
                .map(str::to_string)
                .filter(|l| !l.is_empty());
            if let Some(track_id) = row.value().attr("data-track-id") {
                record.hints.external_ids.beatport = Some(track_id.to_string());
            }
            tracks.push(record);
        }

        if tracks.is_empty() {
            return Err(FetchError::Malformed {
                message: "no chart tracks on page".to_string(),
            });
        }

        let event_name = document
            .select(&heading_selector)
            .next()
            .map(|h| h.text().collect::<String>().trim().to_string())
            .filter(|h| !h.is_empty());
        let dj_name = document
            .select(&curator_selector)
            .next()
            .map(|c| c.text().collect::<String>().trim().to_string())
            .filter(|c| !c.is_empty());

        Ok(PlaylistPayload {
            source: SourceSite::Beatport,
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
impl SourceAdapter for BeatportAdapter {
    fn site(&self) -> SourceSite {
        SourceSite::Beatport
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;

    fn adapter() -> BeatportAdapter {
        let config = FetchConfig::from_env().unwrap();
        BeatportAdapter::new(FetchService::new(config))
    }

    const CHART_PAGE: &str = r#"
        <h1 class="chart-title">Drumcode Radio Picks</h1>
        <a class="chart-curator">Adam Beyer</a>
        <ul>
          <li class="chart-track" data-bpm="135" data-key="5A" data-label="Drumcode" data-track-id="18240051">
            <span class="track-artists">Adam Beyer</span>
            <span class="track-title">Your Mind</span>
          </li>
          <li class="chart-track">
            <span class="track-artists">Amelie Lens</span>
            <span class="track-title">Contradictions</span>
          </li>
        </ul>"#;

    #[tokio::test]
    async fn chart_tracks_carry_beatport_ids() {
        let adapter = adapter();
        let payload = adapter
            .parse_playlist(CHART_PAGE, "https://www.beatport.com/chart/x")
            .unwrap();

        assert_eq!(payload.tracks_in_order.len(), 2);
        let first = &payload.tracks_in_order[0];
        assert_eq!(first.hints.external_ids.beatport.as_deref(), Some("18240051"));
        assert_eq!(first.hints.bpm, Some(135.0));
        assert_eq!(first.hints.musical_key.as_deref(), Some("5A"));
        assert_eq!(payload.meta.dj_name.as_deref(), Some("Adam Beyer"));
        assert!(payload.tracks_in_order[1].hints.external_ids.beatport.is_none());
    }

    #[tokio::test]
    async fn chartless_page_is_malformed() {
        let adapter = adapter();
        assert!(matches!(
            adapter.parse_playlist("<html></html>", "https://x"),
            Err(FetchError::Malformed { .. })
        ));
    }
}
