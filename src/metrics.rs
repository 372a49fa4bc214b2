//! Prometheus metrics collection for the ingestion pipeline.
//!
//! All metrics are collected from actual pipeline state, not placeholder
//! values. The registry is exposed at `GET /metrics`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use prometheus::{CounterVec, Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

const NAMESPACE: &str = "trackgraph";

/// Metrics collector with Prometheus integration
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,

    // Dispatcher metrics
    scrape_requests_total: IntCounterVec,
    scrape_urls_total: IntCounterVec,

    // Fetch substrate metrics
    fetch_retries_total: IntCounterVec,
    rate_limit_throttles_total: IntCounterVec,
    proxy_rotations_total: IntCounter,
    captcha_attempts_total: IntCounterVec,

    // Pipeline metrics
    bronze_playlists_written_total: IntCounter,
    bronze_tracks_written_total: IntCounter,
    payloads_rejected_total: IntCounterVec,
    observations_emitted_total: IntCounter,
    observations_dropped_total: IntCounterVec,
    enrichment_calls_total: IntCounterVec,
    transitions_upserted_total: IntCounter,

    // Stage health
    queue_depth: IntGaugeVec,
    jobs_in_flight: IntGaugeVec,

    // Kept as a CounterVec so durations can be accumulated per source.
    scrape_seconds_total: CounterVec,
}

impl MetricsCollector {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let scrape_requests_total = IntCounterVec::new(
            Opts::new("scrape_requests_total", "Scrape requests by source and terminal status")
                .namespace(NAMESPACE)
                .subsystem("dispatcher"),
            &["source", "status"],
        )?;
        let scrape_urls_total = IntCounterVec::new(
            Opts::new("scrape_urls_total", "Per-URL outcomes by source and result kind")
                .namespace(NAMESPACE)
                .subsystem("dispatcher"),
            &["source", "outcome"],
        )?;
        let scrape_seconds_total = CounterVec::new(
            Opts::new("scrape_seconds_total", "Cumulative scrape execution seconds per source")
                .namespace(NAMESPACE)
                .subsystem("dispatcher"),
            &["source"],
        )?;

        let fetch_retries_total = IntCounterVec::new(
            Opts::new("retries_total", "Fetch retries by error class")
                .namespace(NAMESPACE)
                .subsystem("fetch"),
            &["class"],
        )?;
        let rate_limit_throttles_total = IntCounterVec::new(
            Opts::new("rate_limit_throttles_total", "Server throttle responses per host")
                .namespace(NAMESPACE)
                .subsystem("fetch"),
            &["host"],
        )?;
        let proxy_rotations_total = IntCounter::with_opts(
            Opts::new("proxy_rotations_total", "Proxy rotations after blocked responses")
                .namespace(NAMESPACE)
                .subsystem("fetch"),
        )?;
        let captcha_attempts_total = IntCounterVec::new(
            Opts::new("captcha_attempts_total", "CAPTCHA oracle attempts by outcome")
                .namespace(NAMESPACE)
                .subsystem("fetch"),
            &["outcome"],
        )?;

        let bronze_playlists_written_total = IntCounter::with_opts(
            Opts::new("playlists_written_total", "Bronze playlist upserts")
                .namespace(NAMESPACE)
                .subsystem("bronze"),
        )?;
        let bronze_tracks_written_total = IntCounter::with_opts(
            Opts::new("tracks_written_total", "Bronze track rows written")
                .namespace(NAMESPACE)
                .subsystem("bronze"),
        )?;
        let payloads_rejected_total = IntCounterVec::new(
            Opts::new("payloads_rejected_total", "Structurally rejected payloads by reason")
                .namespace(NAMESPACE)
                .subsystem("bronze"),
            &["reason"],
        )?;

        let observations_emitted_total = IntCounter::with_opts(
            Opts::new("observations_emitted_total", "Adjacency observations written")
                .namespace(NAMESPACE)
                .subsystem("silver"),
        )?;
        let observations_dropped_total = IntCounterVec::new(
            Opts::new("observations_dropped_total", "Consecutive pairs dropped by reason")
                .namespace(NAMESPACE)
                .subsystem("silver"),
            &["reason"],
        )?;
        let enrichment_calls_total = IntCounterVec::new(
            Opts::new("enrichment_calls_total", "Enrichment oracle calls by outcome")
                .namespace(NAMESPACE)
                .subsystem("silver"),
            &["outcome"],
        )?;

        let transitions_upserted_total = IntCounter::with_opts(
            Opts::new("transitions_upserted_total", "Gold transition upserts")
                .namespace(NAMESPACE)
                .subsystem("gold"),
        )?;

        let queue_depth = IntGaugeVec::new(
            Opts::new("queue_depth", "Items waiting in a stage input queue")
                .namespace(NAMESPACE)
                .subsystem("pipeline"),
            &["stage"],
        )?;
        let jobs_in_flight = IntGaugeVec::new(
            Opts::new("jobs_in_flight", "Currently executing scrape requests per source")
                .namespace(NAMESPACE)
                .subsystem("dispatcher"),
            &["source"],
        )?;

        registry.register(Box::new(scrape_requests_total.clone()))?;
        registry.register(Box::new(scrape_urls_total.clone()))?;
        registry.register(Box::new(scrape_seconds_total.clone()))?;
        registry.register(Box::new(fetch_retries_total.clone()))?;
        registry.register(Box::new(rate_limit_throttles_total.clone()))?;
        registry.register(Box::new(proxy_rotations_total.clone()))?;
        registry.register(Box::new(captcha_attempts_total.clone()))?;
        registry.register(Box::new(bronze_playlists_written_total.clone()))?;
        registry.register(Box::new(bronze_tracks_written_total.clone()))?;
        registry.register(Box::new(payloads_rejected_total.clone()))?;
        registry.register(Box::new(observations_emitted_total.clone()))?;
        registry.register(Box::new(observations_dropped_total.clone()))?;
        registry.register(Box::new(enrichment_calls_total.clone()))?;
        registry.register(Box::new(transitions_upserted_total.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(jobs_in_flight.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            scrape_requests_total,
            scrape_urls_total,
            scrape_seconds_total,
            fetch_retries_total,
            rate_limit_throttles_total,
            proxy_rotations_total,
            captcha_attempts_total,
            bronze_playlists_written_total,
            bronze_tracks_written_total,
            payloads_rejected_total,
            observations_emitted_total,
            observations_dropped_total,
            enrichment_calls_total,
            transitions_upserted_total,
            queue_depth,
            jobs_in_flight,
        })
    }

    pub fn record_scrape_request(&self, source: &str, status: &str, seconds: f64) {
        self.scrape_requests_total
            .with_label_values(&[source, status])
            .inc();
        self.scrape_seconds_total
            .with_label_values(&[source])
            .inc_by(seconds);
    }

    pub fn record_url_outcome(&self, source: &str, outcome: &str) {
        self.scrape_urls_total
            .with_label_values(&[source, outcome])
            .inc();
    }

    pub fn record_fetch_retry(&self, class: &str) {
        self.fetch_retries_total.with_label_values(&[class]).inc();
    }

    pub fn record_throttle(&self, host: &str) {
        self.rate_limit_throttles_total
            .with_label_values(&[host])
            .inc();
    }

    pub fn record_proxy_rotation(&self) {
        self.proxy_rotations_total.inc();
    }

    pub fn record_captcha_attempt(&self, outcome: &str) {
        self.captcha_attempts_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn record_bronze_write(&self, track_count: usize) {
        self.bronze_playlists_written_total.inc();
        self.bronze_tracks_written_total.inc_by(track_count as u64);
    }

    pub fn record_payload_rejected(&self, reason: &str) {
        self.payloads_rejected_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn record_observations_emitted(&self, count: usize) {
        self.observations_emitted_total.inc_by(count as u64);
    }

    pub fn record_observation_dropped(&self, reason: &str) {
        self.observations_dropped_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn record_enrichment_call(&self, outcome: &str) {
        self.enrichment_calls_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn record_transitions_upserted(&self, count: usize) {
        self.transitions_upserted_total.inc_by(count as u64);
    }

    pub fn set_queue_depth(&self, stage: &str, depth: i64) {
        self.queue_depth.with_label_values(&[stage]).set(depth);
    }

    pub fn job_started(&self, source: &str) {
        self.jobs_in_flight.with_label_values(&[source]).inc();
    }

    pub fn job_finished(&self, source: &str) {
        self.jobs_in_flight.with_label_values(&[source]).dec();
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// `GET /metrics` handler.
pub async fn metrics_handler(
    axum::extract::State(state): axum::extract::State<crate::AppState>,
) -> Response {
    match state.metrics.gather() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_registers_and_gathers() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.record_scrape_request("mixesdb", "completed", 1.25);
        metrics.record_observation_dropped("sentinel_artist");
        metrics.set_queue_depth("silver", 3);

        let body = metrics.gather().unwrap();
        assert!(body.contains("trackgraph_dispatcher_scrape_requests_total"));
        assert!(body.contains("trackgraph_silver_observations_dropped_total"));
        assert!(body.contains("trackgraph_pipeline_queue_depth"));
    }
}
