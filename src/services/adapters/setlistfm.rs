//! setlist.fm adapter.
//!
//! Setlists list song titles under the performing artist; covers carry the
//! original artist in a cover span. Tracks default to the page artist when
//! no per-song credit exists.

use async_trait::async_trait;
use chrono::NaiveDate;
use scraper::{Html, Selector};

use crate::models::{
    CandidateHints, PlaylistCandidate, PlaylistMeta, PlaylistPayload, SourceSite, TrackRecord,
};
use crate::services::fetch::{FetchError, FetchRequest, FetchService};

use super::{FetchPolicy, SourceAdapter};

const DEFAULT_BASE_URL: &str = "https://www.setlist.fm";

pub struct SetlistFmAdapter {
    fetch: FetchService,
    base_url: String,
}

impl SetlistFmAdapter {
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
            "{}/search?query={}",
            self.base_url,
            urlencoding::encode(query)
        )
    }

    fn parse_search(&self, body: &str, limit: usize) -> Vec<PlaylistCandidate> {
        let document = Html::parse_document(body);
        let link_selector = Selector::parse("a.setlist-link").expect("static selector");
        let date_selector = Selector::parse("span.setlist-date").expect("static selector");

        document
            .select(&link_selector)
            .filter_map(|link| {
                let href = link.value().attr("href")?;
                let url = if href.starts_with("http") {
                    href.to_string()
                } else {
                    format!("{}{}", self.base_url, href)
                };
                let event_date = link
                    .select(&date_selector)
                    .next()
                    .and_then(|d| parse_date(&d.text().collect::<String>()));
                Some(PlaylistCandidate {
                    url,
                    hint_metadata: CandidateHints {
                        event_date,
                        ..CandidateHints::default()
                    },
                })
            })
            .take(limit)
            .collect()
    }

    fn parse_playlist(&self, body: &str, url: &str) -> Result<PlaylistPayload, FetchError> {
        let document = Html::parse_document(body);

        let artist_selector = Selector::parse("h1 strong a span").expect("static selector");
        let venue_selector = Selector::parse("span.venue a span").expect("static selector");
        let date_selector = Selector::parse("span.dateBlock").expect("static selector");
        let song_selector = Selector::parse("ol.songsList li.song").expect("static selector");
        let name_selector = Selector::parse("a.songLabel").expect("static selector");
        let cover_selector = Selector::parse("span.cover a").expect("static selector");

        let page_artist = document
            .select(&artist_selector)
            .next()
            .map(|a| a.text().collect::<String>().trim().to_string())
            .filter(|a| !a.is_empty());

        let mut tracks = Vec::new();
        for song in document.select(&song_selector) {
            let title = song
                .select(&name_selector)
                .next()
                .map(|t| t.text().collect::<String>().trim().to_string())
                .filter(|t| !t.is_empty());
            // Covers credit the original artist, everything else the headliner.
            let artist = song
                .select(&cover_selector)
                .next()
                .map(|c| c.text().collect::<String>().trim().to_string())
                .filter(|c| !c.is_empty())
                .or_else(|| page_artist.clone());

            tracks.push(TrackRecord {
                artist,
                title,
                source_position: None,
                hints: Default::default(),
                raw_blob: serde_json::json!({ "html": song.html() }),
            });
        }

        if tracks.is_empty() {
            return Err(FetchError::Malformed {
                message: "no songs list on page".to_string(),
            });
        }

        let venue = document
            .select(&venue_selector)
            .next()
            .map(|v| v.text().collect::<String>().trim().to_string())
            .filter(|v| !v.is_empty());
        let event_date = document
            .select(&date_selector)
            .next()
            .and_then(|d| parse_date(&d.text().collect::<String>()));

        Ok(PlaylistPayload {
            source: SourceSite::SetlistFm,
            source_url: url.to_string(),
            meta: PlaylistMeta {
                dj_name: page_artist.clone(),
                event_name: page_artist.map(|a| format!("{} live set", a)),
                venue,
                event_date,
                ..PlaylistMeta::default()
            },
            tracks_in_order: tracks,
            raw_blob: serde_json::json!({ "html": body }),
        })
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

#[async_trait]
impl SourceAdapter for SetlistFmAdapter {
    fn site(&self) -> SourceSite {
        SourceSite::SetlistFm
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

    fn adapter() -> SetlistFmAdapter {
        let config = FetchConfig::from_env().unwrap();
        SetlistFmAdapter::new(FetchService::new(config))
    }

    const SETLIST_PAGE: &str = r#"
        <h1><strong><a><span>Charlotte de Witte</span></a></strong></h1>
        <span class="venue"><a><span>Tomorrowland Mainstage</span></a></span>
        <span class="dateBlock">2024-07-20</span>
        <ol class="songsList">
          <li class="song"><a class="songLabel">Sgadi Li Mi</a></li>
          <li class="song"><a class="songLabel">Your Mind</a>
            <span class="cover"><a>Adam Beyer</a></span></li>
        </ol>"#;

    #[tokio::test]
    async fn songs_default_to_the_page_artist() {
        let adapter = adapter();
        let payload = adapter
            .parse_playlist(SETLIST_PAGE, "https://www.setlist.fm/setlist/x")
            .unwrap();

        assert_eq!(payload.tracks_in_order.len(), 2);
        assert_eq!(
            payload.tracks_in_order[0].artist.as_deref(),
            Some("Charlotte de Witte")
        );
        // Covers keep the original artist.
        assert_eq!(
            payload.tracks_in_order[1].artist.as_deref(),
            Some("Adam Beyer")
        );
        assert_eq!(payload.meta.venue.as_deref(), Some("Tomorrowland Mainstage"));
        assert_eq!(
            payload.meta.event_date,
            NaiveDate::from_ymd_opt(2024, 7, 20)
        );
    }

    #[tokio::test]
    async fn songless_page_is_malformed() {
        let adapter = adapter();
        assert!(matches!(
            adapter.parse_playlist("<html></html>", "https://x"),
            Err(FetchError::Malformed { .. })
        ));
    }
}
