//! Unified dispatcher: the single scraping ingress.
//!
//! Routes each request to its source adapter, drives a bounded worker pool
//! under the request's hard deadline, pipes complete payloads through the
//! Bronze writer into the pipeline, and aggregates a structured report.
//! Running one ingress keeps the fetch substrate's rate-limit and proxy
//! state effective across every source.

use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::AppError;
use crate::metrics::MetricsCollector;
use crate::models::{
    JobView, PlaylistCandidate, ScrapeErrorEntry, ScrapeErrorKind, ScrapeReport, ScrapeRequest,
    ScrapeStatus, SourceSite,
};
use crate::services::adapters::{AdapterRegistry, FetchPolicy, SourceAdapter};
use crate::services::bronze::{BronzeWriteError, BronzeWriter};
use crate::services::pipeline::{Pipeline, PipelineJob, PipelineOutcome};

/// How long after the deadline the dispatcher still waits for downstream
/// stage outcomes before reporting without them.
const PIPELINE_REPLY_GRACE: Duration = Duration::from_secs(10);

/// Cumulative request/outcome counters for `GET /stats`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatcherStats {
    pub requests_total: u64,
    pub requests_by_status: HashMap<String, u64>,
    pub requests_by_source: HashMap<String, u64>,
    pub playlists_scraped: u64,
    pub tracks_extracted: u64,
    pub transitions_created: u64,
    pub url_errors_by_kind: HashMap<String, u64>,
}

struct JobEntry {
    source: SourceSite,
    search_query: String,
    limit: usize,
    started_at: chrono::DateTime<chrono::Utc>,
    deadline: chrono::DateTime<chrono::Utc>,
    urls_completed: Arc<AtomicUsize>,
}

struct WorkerSuccess {
    playlist_id: Uuid,
    track_count: usize,
    outcome_rx: Option<oneshot::Receiver<PipelineOutcome>>,
}

#[derive(Clone)]
pub struct ScrapeDispatcher {
    registry: AdapterRegistry,
    writer: BronzeWriter,
    pipeline: Pipeline,
    config: PipelineConfig,
    jobs: Arc<DashMap<Uuid, JobEntry>>,
    stats: Arc<Mutex<DispatcherStats>>,
    metrics: Option<MetricsCollector>,
}

impl ScrapeDispatcher {
    pub fn new(
        registry: AdapterRegistry,
        writer: BronzeWriter,
        pipeline: Pipeline,
        config: PipelineConfig,
    ) -> Self {
        Self {
            registry,
            writer,
            pipeline,
            config,
            jobs: Arc::new(DashMap::new()),
            stats: Arc::new(Mutex::new(DispatcherStats::default())),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Currently executing requests with their deadlines.
    pub fn jobs(&self) -> Vec<JobView> {
        self.jobs
            .iter()
            .map(|entry| JobView {
                id: *entry.key(),
                source: entry.source,
                search_query: entry.search_query.clone(),
                limit: entry.limit,
                started_at: entry.started_at,
                deadline: entry.deadline,
                urls_completed: entry.urls_completed.load(Ordering::Relaxed),
            })
            .collect()
    }

    pub async fn stats(&self) -> DispatcherStats {
        self.stats.lock().await.clone()
    }

    /// Execute one scrape request end to end.
    pub async fn execute(&self, request: ScrapeRequest) -> Result<ScrapeReport, AppError> {
        request
            .validate()
            .map_err(|message| AppError::InvalidRequestFormat(message))?;

        let adapter = self
            .registry
            .get(request.source)
            .ok_or_else(|| AppError::UnknownSource {
                name: request.source.to_string(),
            })?;

        // Admission control: refuse new work while downstream is saturated.
        if self.pipeline.is_saturated() {
            return Err(AppError::Backpressure {
                stage: "silver".to_string(),
            });
        }

        let started = Instant::now();
        let timeout = Duration::from_secs(request.options.timeout_seconds);
        let deadline = started + timeout;

        let job_id = Uuid::new_v4();
        let urls_completed = Arc::new(AtomicUsize::new(0));
        self.jobs.insert(
            job_id,
            JobEntry {
                source: request.source,
                search_query: request.search_query.clone(),
                limit: request.limit,
                started_at: chrono::Utc::now(),
                deadline: chrono::Utc::now()
                    + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::zero()),
                urls_completed: urls_completed.clone(),
            },
        );
        if let Some(metrics) = &self.metrics {
            metrics.job_started(request.source.as_str());
        }

        let report = self
            .run(&request, adapter, deadline, urls_completed)
            .await;

        self.jobs.remove(&job_id);
        if let Some(metrics) = &self.metrics {
            metrics.job_finished(request.source.as_str());
        }

        let execution_seconds = started.elapsed().as_secs_f64();
        let report = ScrapeReport {
            execution_seconds,
            ..report
        };

        self.record(&request, &report).await;
        Ok(report)
    }

    async fn run(
        &self,
        request: &ScrapeRequest,
        adapter: Arc<dyn SourceAdapter>,
        deadline: Instant,
        urls_completed: Arc<AtomicUsize>,
    ) -> ScrapeReport {
        let policy = FetchPolicy {
            deadline: Some(deadline),
            max_retries: request.options.max_retries,
        };

        let mut errors: Vec<ScrapeErrorEntry> = Vec::new();

        let candidates = match adapter
            .search(&request.search_query, request.limit, policy)
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                errors.push(ScrapeErrorEntry {
                    url: format!("search:{}", request.search_query),
                    kind: e.kind(),
                    message: e.to_string(),
                });
                let status = match e.kind() {
                    ScrapeErrorKind::DeadlineExceeded | ScrapeErrorKind::Cancelled => {
                        ScrapeStatus::Timeout
                    }
                    _ => ScrapeStatus::Failed,
                };
                return ScrapeReport {
                    status,
                    playlists_scraped: 0,
                    tracks_extracted: 0,
                    transitions_created: 0,
                    errors,
                    bronze_playlist_ids: Vec::new(),
                    execution_seconds: 0.0,
                };
            }
        };

        info!(
            source = %request.source,
            query = %request.search_query,
            candidates = candidates.len(),
            "Search yielded candidates"
        );

        // Bounded fan-out; the pool stays small so per-host rate limiting
        // does not fight itself.
        let semaphore = Arc::new(Semaphore::new(self.config.workers_per_request));
        let mut join_set: JoinSet<(String, Result<WorkerSuccess, ScrapeErrorEntry>)> =
            JoinSet::new();

        for candidate in candidates.into_iter().take(request.limit) {
            let semaphore = semaphore.clone();
            let adapter = adapter.clone();
            let writer = self.writer.clone();
            let pipeline = self.pipeline.clone();
            let urls_completed = urls_completed.clone();
            let enrich = request.options.enable_enrichment;

            join_set.spawn(async move {
                let PlaylistCandidate { url, .. } = candidate;

                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            url.clone(),
                            Err(cancelled_entry(&url, "worker pool closed")),
                        )
                    }
                };

                // URLs we never started on are cancelled, not timed out.
                if Instant::now() >= deadline {
                    return (
                        url.clone(),
                        Err(cancelled_entry(&url, "deadline reached before fetch started")),
                    );
                }

                let result =
                    fetch_and_write(adapter.as_ref(), &writer, &pipeline, &url, policy, enrich)
                        .await;
                urls_completed.fetch_add(1, Ordering::Relaxed);
                (url, result)
            });
        }

        let mut successes: Vec<WorkerSuccess> = Vec::new();
        let mut bronze_playlist_ids = Vec::new();
        let mut tracks_extracted = 0usize;

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_, Ok(success))) => {
                    bronze_playlist_ids.push(success.playlist_id);
                    tracks_extracted += success.track_count;
                    successes.push(success);
                }
                Ok((url, Err(entry))) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_url_outcome(request.source.as_str(), entry.kind.as_str());
                    }
                    warn!(url = %url, kind = ?entry.kind, "Scrape URL failed");
                    errors.push(entry);
                }
                Err(join_error) => {
                    errors.push(ScrapeErrorEntry {
                        url: String::new(),
                        kind: ScrapeErrorKind::Internal,
                        message: format!("worker panicked: {}", join_error),
                    });
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            for _ in &bronze_playlist_ids {
                metrics.record_url_outcome(request.source.as_str(), "ok");
            }
        }

        // Collect downstream outcomes together; bounded so a slow oracle
        // cannot hold the report hostage.
        let replies = successes
            .iter_mut()
            .filter_map(|success| success.outcome_rx.take())
            .map(|outcome_rx| tokio::time::timeout(PIPELINE_REPLY_GRACE, outcome_rx));
        let transitions_created = join_all(replies)
            .await
            .into_iter()
            .filter_map(|reply| reply.ok().and_then(|r| r.ok()))
            .map(|outcome| outcome.transitions_upserted)
            .sum();

        let deadline_related = errors.iter().any(|e| {
            matches!(
                e.kind,
                ScrapeErrorKind::DeadlineExceeded | ScrapeErrorKind::Cancelled
            )
        });
        let status = if errors.is_empty() {
            ScrapeStatus::Completed
        } else if !bronze_playlist_ids.is_empty() {
            ScrapeStatus::Partial
        } else if deadline_related {
            ScrapeStatus::Timeout
        } else {
            ScrapeStatus::Failed
        };

        ScrapeReport {
            status,
            playlists_scraped: bronze_playlist_ids.len(),
            tracks_extracted,
            transitions_created,
            errors,
            bronze_playlist_ids,
            execution_seconds: 0.0,
        }
    }

    async fn record(&self, request: &ScrapeRequest, report: &ScrapeReport) {
        let status = match report.status {
            ScrapeStatus::Completed => "completed",
            ScrapeStatus::Partial => "partial",
            ScrapeStatus::Failed => "failed",
            ScrapeStatus::Timeout => "timeout",
        };

        let mut stats = self.stats.lock().await;
        stats.requests_total += 1;
        *stats
            .requests_by_status
            .entry(status.to_string())
            .or_insert(0) += 1;
        *stats
            .requests_by_source
            .entry(request.source.to_string())
            .or_insert(0) += 1;
        stats.playlists_scraped += report.playlists_scraped as u64;
        stats.tracks_extracted += report.tracks_extracted as u64;
        stats.transitions_created += report.transitions_created as u64;
        for error in &report.errors {
            *stats
                .url_errors_by_kind
                .entry(error.kind.as_str().to_string())
                .or_insert(0) += 1;
        }
        drop(stats);

        if let Some(metrics) = &self.metrics {
            metrics.record_scrape_request(
                request.source.as_str(),
                status,
                report.execution_seconds,
            );
        }
    }
}

async fn fetch_and_write(
    adapter: &dyn SourceAdapter,
    writer: &BronzeWriter,
    pipeline: &Pipeline,
    url: &str,
    policy: FetchPolicy,
    enrich: bool,
) -> Result<WorkerSuccess, ScrapeErrorEntry> {
    let payload = adapter.fetch(url, policy).await.map_err(|e| ScrapeErrorEntry {
        url: url.to_string(),
        kind: e.kind(),
        message: e.to_string(),
    })?;

    let outcome = writer.write(&payload).await.map_err(|e| match e {
        BronzeWriteError::InvalidPayload { reason } => ScrapeErrorEntry {
            url: url.to_string(),
            kind: ScrapeErrorKind::InvalidPayload,
            message: reason,
        },
        BronzeWriteError::Store(store_error) => ScrapeErrorEntry {
            url: url.to_string(),
            kind: ScrapeErrorKind::Internal,
            message: store_error.to_string(),
        },
    })?;

    // The playlist is durable from here; downstream processing is decoupled
    // from the scrape deadline.
    let (reply_tx, reply_rx) = oneshot::channel();
    let submitted = pipeline
        .submit(PipelineJob {
            bronze_playlist_id: outcome.playlist_id,
            enrich,
            reply: Some(reply_tx),
        })
        .await;
    let outcome_rx = match submitted {
        Ok(()) => Some(reply_rx),
        Err(e) => {
            warn!(playlist_id = %outcome.playlist_id, error = %e, "Pipeline submission failed");
            None
        }
    };

    Ok(WorkerSuccess {
        playlist_id: outcome.playlist_id,
        track_count: outcome.track_count,
        outcome_rx,
    })
}

fn cancelled_entry(url: &str, message: &str) -> ScrapeErrorEntry {
    ScrapeErrorEntry {
        url: url.to_string(),
        kind: ScrapeErrorKind::Cancelled,
        message: message.to_string(),
    }
}
