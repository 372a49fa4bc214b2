//! Name normalization, the sentinel artist filter and fuzzy title matching.
//!
//! All tables are built once at startup and immutable afterwards; matching
//! functions are pure so the canonicalizer stays trivially testable.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Placeholder credits that may never become graph endpoints.
const BUILTIN_SENTINELS: [&str; 4] = ["unknown", "unknown artist", "various artists", "va"];

fn whitespace_regex() -> &'static Regex {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

/// Normalize a raw name: trim, collapse whitespace, lowercase, strip
/// diacritics via NFKD decomposition.
pub fn normalize_name(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let stripped: String = lowered.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    whitespace_regex().replace_all(&stripped, " ").into_owned()
}

/// Jaro-Winkler similarity over normalized titles.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    strsim::jaro_winkler(a, b)
}

/// The configured set of placeholder artist names.
#[derive(Debug, Clone)]
pub struct SentinelFilter {
    sentinels: HashSet<String>,
}

impl SentinelFilter {
    pub fn new(extra: &[String]) -> Self {
        let mut sentinels: HashSet<String> = BUILTIN_SENTINELS
            .iter()
            .map(|s| s.to_string())
            .collect();
        sentinels.extend(extra.iter().map(|s| normalize_name(s)));
        Self { sentinels }
    }

    /// Whether a normalized name is a placeholder rather than an artist.
    pub fn is_sentinel(&self, normalized: &str) -> bool {
        self.sentinels.contains(normalized)
    }
}

/// Immutable alias table applied after normalization. Each entry keeps the
/// canonical pair's display-cased form so an alias arriving before any
/// full-form credit still creates a properly named artist.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    /// normalized alias -> normalized canonical
    aliases: HashMap<String, String>,
    /// normalized canonical -> display-cased canonical
    display_names: HashMap<String, String>,
}

impl AliasTable {
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        let mut aliases = HashMap::new();
        let mut display_names = HashMap::new();
        for (alias, canonical) in pairs {
            let normalized_canonical = normalize_name(canonical);
            aliases.insert(normalize_name(alias), normalized_canonical.clone());
            display_names.insert(normalized_canonical, canonical.trim().to_string());
        }
        Self {
            aliases,
            display_names,
        }
    }

    /// Resolve an alias to its canonical normalized form, or echo the input.
    pub fn resolve<'a>(&'a self, normalized: &'a str) -> &'a str {
        self.aliases
            .get(normalized)
            .map(String::as_str)
            .unwrap_or(normalized)
    }

    /// Display-cased canonical form for a normalized name the table knows.
    pub fn canonical_display(&self, normalized: &str) -> Option<&str> {
        self.display_names.get(normalized).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}
