//! Gold aggregator.
//!
//! Folds adjacency observations into per-transition counters and derived
//! mix metrics. A transition's occurrence count is always the number of
//! distinct playlists proving it; aggregation for one `(source, target)`
//! pair is serialized under its own lock.

use anyhow::{Context, Result};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::GoldConfig;
use crate::metrics::MetricsCollector;
use crate::models::{CanonicalTrack, DerivedMetrics, TrackStats, Transition};
use crate::storage::{GoldStore, SilverStore};

/// A key on the harmonic wheel: hour 1..=12 plus the minor (A) or
/// major (B) ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CamelotKey {
    pub hour: u8,
    pub major: bool,
}

/// Parse Camelot codes (`8A`) and common musical notation (`A min`,
/// `C#m`, `F major`).
pub fn parse_key(raw: &str) -> Option<CamelotKey> {
    let cleaned = raw.trim();
    if cleaned.is_empty() {
        return None;
    }

    // Camelot form first: digits then A/B.
    let upper = cleaned.to_uppercase();
    if let Some(ring) = upper.strip_prefix(|c: char| c.is_ascii_digit()) {
        let digits: String = upper.chars().take_while(|c| c.is_ascii_digit()).collect();
        let ring = ring.trim_start_matches(|c: char| c.is_ascii_digit());
        if let Ok(hour) = digits.parse::<u8>() {
            if (1..=12).contains(&hour) {
                match ring {
                    "A" => return Some(CamelotKey { hour, major: false }),
                    "B" => return Some(CamelotKey { hour, major: true }),
                    _ => {}
                }
            }
        }
    }

    parse_musical_notation(cleaned)
}

fn parse_musical_notation(raw: &str) -> Option<CamelotKey> {
    let mut chars = raw.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    let rest: String = chars.collect();
    let rest = rest.trim();

    let (accidental, rest) = match rest.chars().next() {
        Some('#') | Some('♯') => (1i8, &rest[rest.chars().next()?.len_utf8()..]),
        Some('b') | Some('♭') => (-1i8, &rest[rest.chars().next()?.len_utf8()..]),
        _ => (0, rest),
    };

    let quality = rest.trim().to_lowercase();
    let minor = match quality.as_str() {
        "" | "maj" | "major" => false,
        "m" | "min" | "minor" => true,
        _ => return None,
    };

    // Semitone of the root, C = 0.
    let base = match letter {
        'C' => 0i8,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let semitone = ((base + accidental).rem_euclid(12)) as u8;

    // Camelot hour of C major / A minor is 8; each wheel step is a fifth.
    let hour = if minor {
        // Minor ring: A minor = 8A, each fifth up adds one hour.
        camelot_hour_from_semitone((semitone + 3) % 12)
    } else {
        camelot_hour_from_semitone(semitone)
    };
    Some(CamelotKey {
        hour,
        major: !minor,
    })
}

fn camelot_hour_from_semitone(major_semitone: u8) -> u8 {
    // C major (semitone 0) sits at hour 8; each wheel hour adds a fifth
    // (7 semitones), and 7 is its own inverse mod 12.
    let steps = (major_semitone as i16 * 7).rem_euclid(12);
    let hour = (8 + steps) % 12;
    if hour == 0 {
        12
    } else {
        hour as u8
    }
}

/// Standard harmonic-wheel relation: same key, one hour either way on the
/// same ring, or the relative major/minor swap.
pub fn keys_compatible(a: CamelotKey, b: CamelotKey) -> bool {
    if a == b {
        return true;
    }
    if a.major == b.major {
        let diff = (a.hour as i16 - b.hour as i16).rem_euclid(12);
        return diff == 1 || diff == 11;
    }
    a.hour == b.hour
}

#[derive(Debug, Clone, Default)]
pub struct AggregationSummary {
    pub transitions_upserted: usize,
    pub transitions_deleted: usize,
}

#[derive(Clone)]
pub struct GoldAggregator {
    silver: Arc<dyn SilverStore>,
    gold: Arc<dyn GoldStore>,
    config: GoldConfig,
    pair_locks: Arc<DashMap<(Uuid, Uuid), Arc<Mutex<()>>>>,
    metrics: Option<MetricsCollector>,
}

impl GoldAggregator {
    pub fn new(silver: Arc<dyn SilverStore>, gold: Arc<dyn GoldStore>, config: GoldConfig) -> Self {
        Self {
            silver,
            gold,
            config,
            pair_locks: Arc::new(DashMap::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Recompute exactly the given pairs from their observations. Pairs with
    /// no remaining observations lose their transition row.
    pub async fn update_pairs(&self, pairs: &[(Uuid, Uuid)]) -> Result<AggregationSummary> {
        let mut summary = AggregationSummary::default();
        let unique: HashSet<(Uuid, Uuid)> = pairs.iter().copied().collect();

        for pair in unique {
            let lock = self
                .pair_locks
                .entry(pair)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            let _guard = lock.lock().await;

            let (source_track_id, target_track_id) = pair;
            let observations = self
                .silver
                .observations_for_pair(source_track_id, target_track_id)
                .await?;

            if observations.is_empty() {
                self.gold
                    .delete_transition(source_track_id, target_track_id)
                    .await?;
                summary.transitions_deleted += 1;
                debug!(
                    source = %source_track_id,
                    target = %target_track_id,
                    "Removed transition with no remaining observations"
                );
                continue;
            }

            let mut observing: Vec<Uuid> = observations
                .iter()
                .map(|o| o.canonical_playlist_id)
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            observing.sort();

            let source = self
                .silver
                .get_track(source_track_id)
                .await?
                .context("source track missing for transition")?;
            let target = self
                .silver
                .get_track(target_track_id)
                .await?
                .context("target track missing for transition")?;

            let occurrence_count = observing.len() as i64;
            let metrics = self.derive_metrics(occurrence_count, &source, &target);

            self.gold
                .upsert_transition(&Transition {
                    id: Uuid::new_v4(),
                    source_track_id,
                    target_track_id,
                    occurrence_count,
                    observing_playlist_ids: observing,
                    last_observed_at: Utc::now(),
                    metrics,
                })
                .await?;
            summary.transitions_upserted += 1;
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_transitions_upserted(summary.transitions_upserted);
        }

        self.recompute_track_stats().await?;

        info!(
            upserted = summary.transitions_upserted,
            deleted = summary.transitions_deleted,
            "Gold aggregation pass complete"
        );
        Ok(summary)
    }

    /// Full rebuild from every observation in Silver.
    pub async fn rebuild_all(&self) -> Result<AggregationSummary> {
        let observations = self.silver.all_observations().await?;
        let mut pairs: HashSet<(Uuid, Uuid)> = observations
            .iter()
            .map(|o| (o.source_track_id, o.target_track_id))
            .collect();

        // Stale transitions whose observations vanished must also go.
        for transition in self.gold.all_transitions().await? {
            pairs.insert((transition.source_track_id, transition.target_track_id));
        }

        let pairs: Vec<(Uuid, Uuid)> = pairs.into_iter().collect();
        self.update_pairs(&pairs).await
    }

    /// Derived averages and scores for one transition.
    fn derive_metrics(
        &self,
        occurrence_count: i64,
        source: &CanonicalTrack,
        target: &CanonicalTrack,
    ) -> DerivedMetrics {
        let bpm_delta_avg = match (source.bpm, target.bpm) {
            (Some(source_bpm), Some(target_bpm)) => Some(target_bpm - source_bpm),
            _ => None,
        };
        let energy_delta_avg = match (source.energy, target.energy) {
            (Some(source_energy), Some(target_energy)) => Some(target_energy - source_energy),
            _ => None,
        };
        let key_compat_rate = match (
            source.musical_key.as_deref().and_then(parse_key),
            target.musical_key.as_deref().and_then(parse_key),
        ) {
            (Some(a), Some(b)) => Some(if keys_compatible(a, b) { 1.0 } else { 0.0 }),
            _ => None,
        };

        let confidence = self.confidence(occurrence_count);
        let quality = self.quality(occurrence_count, bpm_delta_avg, key_compat_rate, energy_delta_avg);

        DerivedMetrics {
            bpm_delta_avg,
            key_compat_rate,
            energy_delta_avg,
            confidence,
            quality,
        }
    }

    /// Saturating function of evidence count: `1 - exp(-count / k)`.
    fn confidence(&self, occurrence_count: i64) -> f64 {
        1.0 - (-(occurrence_count as f64) / self.config.confidence_k).exp()
    }

    /// Weighted blend of bounded components; undefined components are
    /// neutral at 0.5.
    fn quality(
        &self,
        occurrence_count: i64,
        bpm_delta_avg: Option<f64>,
        key_compat_rate: Option<f64>,
        energy_delta_avg: Option<f64>,
    ) -> f64 {
        let occurrence_component = self.confidence(occurrence_count);
        let bpm_component = bpm_delta_avg
            .map(|delta| 1.0 - (delta.abs() / self.config.bpm_tolerance).min(1.0))
            .unwrap_or(0.5);
        let key_component = key_compat_rate.unwrap_or(0.5);
        let energy_component = energy_delta_avg
            .map(|delta| 1.0 - delta.abs().min(1.0))
            .unwrap_or(0.5);

        let quality = self.config.weight_occurrence * occurrence_component
            + self.config.weight_bpm * bpm_component
            + self.config.weight_key * key_component
            + self.config.weight_energy * energy_component;
        quality.clamp(0.0, 1.0)
    }

    /// Rebuild per-track statistics: appearances, degrees, popularity.
    pub async fn recompute_track_stats(&self) -> Result<()> {
        let appearances = self.silver.track_appearance_counts().await?;
        let transitions = self.gold.all_transitions().await?;

        let mut in_degree: HashMap<Uuid, i64> = HashMap::new();
        let mut out_degree: HashMap<Uuid, i64> = HashMap::new();
        for transition in &transitions {
            *out_degree.entry(transition.source_track_id).or_insert(0) += 1;
            *in_degree.entry(transition.target_track_id).or_insert(0) += 1;
        }

        let max_appearances = appearances.values().copied().max().unwrap_or(0);
        let min_appearances = appearances.values().copied().min().unwrap_or(0);
        let range = (max_appearances - min_appearances) as f64;

        let mut stats: Vec<TrackStats> = appearances
            .iter()
            .map(|(track_id, appearance_count)| {
                let popularity = if range > 0.0 {
                    ((appearance_count - min_appearances) as f64 / range).clamp(0.0, 1.0)
                } else {
                    // A uniform active set pins everyone to full popularity.
                    1.0
                };
                TrackStats {
                    track_id: *track_id,
                    appearance_count: *appearance_count,
                    in_degree: in_degree.get(track_id).copied().unwrap_or(0),
                    out_degree: out_degree.get(track_id).copied().unwrap_or(0),
                    popularity,
                }
            })
            .collect();
        stats.sort_by_key(|s| s.track_id);

        self.gold.replace_track_stats(&stats).await?;
        Ok(())
    }
}
