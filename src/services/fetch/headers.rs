//! Browser header rotation.
//!
//! A pool of plausible browser profiles; one is chosen per host session and
//! kept until explicitly rotated, so a host sees a stable fingerprint
//! instead of churn.

use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct HeaderSet {
    pub user_agent: &'static str,
    pub accept: &'static str,
    pub accept_language: &'static str,
}

static HEADER_PROFILES: &[HeaderSet] = &[
    HeaderSet {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                     (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        accept_language: "en-US,en;q=0.9",
    },
    HeaderSet {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 \
                     (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        accept_language: "en-GB,en;q=0.8",
    },
    HeaderSet {
        user_agent: "Mozilla/5.0 (X11; Linux x86_64; rv:127.0) Gecko/20100101 Firefox/127.0",
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        accept_language: "en-US,en;q=0.5",
    },
    HeaderSet {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0",
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        accept_language: "de-DE,de;q=0.9,en;q=0.7",
    },
];

/// Sticky per-host header selection; cheap to clone.
#[derive(Clone)]
pub struct HeaderRotation {
    sessions: Arc<DashMap<String, usize>>,
}

impl HeaderRotation {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// The header set for a host session, chosen at first use and then kept.
    pub fn session_for(&self, host: &str) -> HeaderSet {
        let index = *self
            .sessions
            .entry(host.to_string())
            .or_insert_with(|| rand::thread_rng().gen_range(0..HEADER_PROFILES.len()));
        HEADER_PROFILES[index].clone()
    }

    /// Switch the host session to a different profile (after a block).
    pub fn rotate(&self, host: &str) -> HeaderSet {
        let mut entry = self
            .sessions
            .entry(host.to_string())
            .or_insert_with(|| rand::thread_rng().gen_range(0..HEADER_PROFILES.len()));
        *entry = (*entry + 1) % HEADER_PROFILES.len();
        HEADER_PROFILES[*entry].clone()
    }
}

impl Default for HeaderRotation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_are_sticky_per_host() {
        let rotation = HeaderRotation::new();
        let first = rotation.session_for("mixesdb.com");
        for _ in 0..10 {
            assert_eq!(rotation.session_for("mixesdb.com").user_agent, first.user_agent);
        }
    }

    #[test]
    fn rotate_changes_the_profile() {
        let rotation = HeaderRotation::new();
        let before = rotation.session_for("beatport.com");
        let after = rotation.rotate("beatport.com");
        assert_ne!(before.user_agent, after.user_agent);
        assert_eq!(rotation.session_for("beatport.com").user_agent, after.user_agent);
    }
}
