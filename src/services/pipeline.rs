//! Stage wiring for the single-binary deployment.
//!
//! Bronze hands playlist ids to Silver, Silver hands dirty pairs to Gold,
//! Gold ticks the Operational materializer; each stage is a long-running
//! task fed by a bounded channel. Full queues are the backpressure signal:
//! the dispatcher refuses new work once the ingress queue passes its
//! high-water mark, and in-flight submissions simply wait.

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::metrics::MetricsCollector;
use crate::services::gold::GoldAggregator;
use crate::services::operational::OperationalMaterializer;
use crate::services::silver::SilverCanonicalizer;

/// Work item entering the Silver stage.
pub struct PipelineJob {
    pub bronze_playlist_id: Uuid,
    pub enrich: bool,
    /// Resolved once the playlist has flowed through every stage.
    pub reply: Option<oneshot::Sender<PipelineOutcome>>,
}

/// What one playlist produced downstream.
#[derive(Debug, Clone, Default)]
pub struct PipelineOutcome {
    pub canonical_playlist_id: Option<Uuid>,
    pub observations_written: usize,
    pub transitions_upserted: usize,
}

struct GoldJob {
    pairs: Vec<(Uuid, Uuid)>,
    partial: PipelineOutcome,
    reply: Option<oneshot::Sender<PipelineOutcome>>,
}

struct MaterializeJob {
    outcome: PipelineOutcome,
    reply: Option<oneshot::Sender<PipelineOutcome>>,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{stage} stage queue is above its high-water mark")]
    Saturated { stage: &'static str },

    #[error("pipeline is shut down")]
    Closed,
}

/// Handle to the running stage tasks; cheap to clone.
#[derive(Clone)]
pub struct Pipeline {
    silver_tx: mpsc::Sender<PipelineJob>,
    capacity: usize,
    high_water: usize,
    shutdown_tx: watch::Sender<bool>,
    metrics: Option<MetricsCollector>,
}

impl Pipeline {
    /// Spawn the Silver, Gold and Operational stage tasks.
    pub fn start(
        canonicalizer: SilverCanonicalizer,
        aggregator: GoldAggregator,
        materializer: OperationalMaterializer,
        config: &PipelineConfig,
        metrics: Option<MetricsCollector>,
    ) -> Self {
        let capacity = config.queue_capacity;
        let (silver_tx, silver_rx) = mpsc::channel::<PipelineJob>(capacity);
        let (gold_tx, gold_rx) = mpsc::channel::<GoldJob>(capacity);
        let (materialize_tx, materialize_rx) = mpsc::channel::<MaterializeJob>(capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(run_silver_stage(
            canonicalizer,
            silver_rx,
            gold_tx,
            shutdown_rx.clone(),
            metrics.clone(),
        ));
        tokio::spawn(run_gold_stage(
            aggregator,
            gold_rx,
            materialize_tx,
            shutdown_rx.clone(),
            metrics.clone(),
        ));
        tokio::spawn(run_operational_stage(
            materializer,
            materialize_rx,
            shutdown_rx,
        ));

        Self {
            silver_tx,
            capacity,
            high_water: config.high_water_mark(),
            shutdown_tx,
            metrics,
        }
    }

    /// Items currently waiting in the ingress queue.
    pub fn depth(&self) -> usize {
        self.capacity - self.silver_tx.capacity()
    }

    /// Admission-control check for the dispatcher.
    pub fn is_saturated(&self) -> bool {
        self.depth() >= self.high_water
    }

    /// Hand a freshly written Bronze playlist to the Silver stage. Waits for
    /// queue room rather than dropping work.
    pub async fn submit(&self, job: PipelineJob) -> Result<(), PipelineError> {
        self.silver_tx
            .send(job)
            .await
            .map_err(|_| PipelineError::Closed)?;
        if let Some(metrics) = &self.metrics {
            metrics.set_queue_depth("silver", self.depth() as i64);
        }
        Ok(())
    }

    /// Signal every stage to stop after its in-flight unit completes.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        info!("Pipeline shutdown signalled");
    }
}

async fn run_silver_stage(
    canonicalizer: SilverCanonicalizer,
    mut rx: mpsc::Receiver<PipelineJob>,
    gold_tx: mpsc::Sender<GoldJob>,
    mut shutdown: watch::Receiver<bool>,
    metrics: Option<MetricsCollector>,
) {
    loop {
        let job = tokio::select! {
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        if let Some(metrics) = &metrics {
            metrics.set_queue_depth("silver", rx.len() as i64);
        }

        match canonicalizer
            .process_playlist(job.bronze_playlist_id, job.enrich)
            .await
        {
            Ok(outcome) => {
                let gold_job = GoldJob {
                    pairs: outcome.affected_pairs.clone(),
                    partial: PipelineOutcome {
                        canonical_playlist_id: Some(outcome.canonical_playlist_id),
                        observations_written: outcome.observations_written,
                        transitions_upserted: 0,
                    },
                    reply: job.reply,
                };
                if gold_tx.send(gold_job).await.is_err() {
                    warn!("Gold stage queue closed, dropping downstream work");
                    break;
                }
            }
            Err(e) => {
                error!(
                    bronze_playlist_id = %job.bronze_playlist_id,
                    error = %e,
                    "Silver canonicalization failed"
                );
                if let Some(reply) = job.reply {
                    let _ = reply.send(PipelineOutcome::default());
                }
            }
        }
    }
    info!("Silver stage stopped");
}

async fn run_gold_stage(
    aggregator: GoldAggregator,
    mut rx: mpsc::Receiver<GoldJob>,
    materialize_tx: mpsc::Sender<MaterializeJob>,
    mut shutdown: watch::Receiver<bool>,
    metrics: Option<MetricsCollector>,
) {
    loop {
        let job = tokio::select! {
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        if let Some(metrics) = &metrics {
            metrics.set_queue_depth("gold", rx.len() as i64);
        }

        let mut outcome = job.partial;
        match aggregator.update_pairs(&job.pairs).await {
            Ok(summary) => {
                outcome.transitions_upserted = summary.transitions_upserted;
            }
            Err(e) => {
                error!(error = %e, "Gold aggregation failed");
            }
        }

        let materialize_job = MaterializeJob {
            outcome,
            reply: job.reply,
        };
        if materialize_tx.send(materialize_job).await.is_err() {
            warn!("Operational stage queue closed, dropping downstream work");
            break;
        }
    }
    info!("Gold stage stopped");
}

async fn run_operational_stage(
    materializer: OperationalMaterializer,
    mut rx: mpsc::Receiver<MaterializeJob>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let job = tokio::select! {
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        if let Err(e) = materializer.materialize().await {
            error!(error = %e, "Operational materialization failed");
        }

        if let Some(reply) = job.reply {
            let _ = reply.send(job.outcome);
        }
    }
    info!("Operational stage stopped");
}
