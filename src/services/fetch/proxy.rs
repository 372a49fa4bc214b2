//! Proxy pool with health scoring.
//!
//! A single owner task mutates scores serially; callers talk to it over a
//! channel. Selection is weighted random over healthy proxies, and a proxy
//! whose score falls below the park threshold sits out a cooldown before it
//! is offered again.

use rand::Rng;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Score gained on success / lost on failure.
const SCORE_STEP: i32 = 1;
/// Ceiling so a long healthy streak cannot mask a sudden degradation.
const SCORE_CAP: i32 = 10;

#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    pub endpoints: Vec<String>,
    pub park_threshold: i32,
    pub park_cooldown: Duration,
}

/// Health view of one proxy, for the health endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProxyStatus {
    pub url: String,
    pub score: i32,
    pub parked: bool,
}

struct ProxyState {
    url: String,
    score: i32,
    parked_until: Option<Instant>,
}

enum ProxyMsg {
    /// Pick a proxy distinct from `avoid` when possible.
    Select {
        avoid: Option<String>,
        reply: oneshot::Sender<Option<String>>,
    },
    Report {
        url: String,
        success: bool,
    },
    Snapshot(oneshot::Sender<Vec<ProxyStatus>>),
}

async fn run_pool(config: ProxyPoolConfig, mut rx: mpsc::Receiver<ProxyMsg>) {
    let mut proxies: Vec<ProxyState> = config
        .endpoints
        .iter()
        .map(|url| ProxyState {
            url: url.clone(),
            score: 0,
            parked_until: None,
        })
        .collect();

    while let Some(msg) = rx.recv().await {
        match msg {
            ProxyMsg::Select { avoid, reply } => {
                let now = Instant::now();
                for proxy in proxies.iter_mut() {
                    if let Some(until) = proxy.parked_until {
                        if now >= until {
                            proxy.parked_until = None;
                            proxy.score = 0;
                        }
                    }
                }

                let candidates: Vec<&ProxyState> = proxies
                    .iter()
                    .filter(|p| p.parked_until.is_none())
                    .filter(|p| avoid.as_deref() != Some(p.url.as_str()))
                    .collect();
                // Fall back to the avoided proxy rather than none at all.
                let candidates = if candidates.is_empty() {
                    proxies
                        .iter()
                        .filter(|p| p.parked_until.is_none())
                        .collect()
                } else {
                    candidates
                };

                let chosen = weighted_pick(&candidates, config.park_threshold);
                let _ = reply.send(chosen);
            }
            ProxyMsg::Report { url, success } => {
                if let Some(proxy) = proxies.iter_mut().find(|p| p.url == url) {
                    if success {
                        proxy.score = (proxy.score + SCORE_STEP).min(SCORE_CAP);
                    } else {
                        proxy.score -= SCORE_STEP;
                        if proxy.score < config.park_threshold {
                            proxy.parked_until = Some(Instant::now() + config.park_cooldown);
                        }
                    }
                }
            }
            ProxyMsg::Snapshot(reply) => {
                let now = Instant::now();
                let statuses = proxies
                    .iter()
                    .map(|p| ProxyStatus {
                        url: p.url.clone(),
                        score: p.score,
                        parked: p.parked_until.map(|until| now < until).unwrap_or(false),
                    })
                    .collect();
                let _ = reply.send(statuses);
            }
        }
    }
}

fn weighted_pick(candidates: &[&ProxyState], park_threshold: i32) -> Option<String> {
    if candidates.is_empty() {
        return None;
    }
    // Shift scores so every candidate keeps a positive weight.
    let weights: Vec<u32> = candidates
        .iter()
        .map(|p| (p.score - park_threshold).max(1) as u32)
        .collect();
    let total: u32 = weights.iter().sum();
    let mut roll = rand::thread_rng().gen_range(0..total);
    for (candidate, weight) in candidates.iter().zip(weights) {
        if roll < weight {
            return Some(candidate.url.clone());
        }
        roll -= weight;
    }
    candidates.last().map(|p| p.url.clone())
}

/// Handle to the proxy pool task; cheap to clone. An empty pool always
/// selects `None`, meaning a direct connection.
#[derive(Clone)]
pub struct ProxyPool {
    tx: Option<mpsc::Sender<ProxyMsg>>,
}

impl ProxyPool {
    pub fn new(config: ProxyPoolConfig) -> Self {
        if config.endpoints.is_empty() {
            return Self { tx: None };
        }
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(run_pool(config, rx));
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub async fn select(&self, avoid: Option<&str>) -> Option<String> {
        let tx = self.tx.as_ref()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(ProxyMsg::Select {
            avoid: avoid.map(String::from),
            reply: reply_tx,
        })
        .await
        .ok()?;
        reply_rx.await.ok().flatten()
    }

    pub async fn report(&self, url: &str, success: bool) {
        if let Some(tx) = &self.tx {
            let _ = tx
                .send(ProxyMsg::Report {
                    url: url.to_string(),
                    success,
                })
                .await;
        }
    }

    pub async fn snapshot(&self) -> Vec<ProxyStatus> {
        let Some(tx) = &self.tx else {
            return Vec::new();
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if tx.send(ProxyMsg::Snapshot(reply_tx)).await.is_err() {
            return Vec::new();
        }
        reply_rx.await.unwrap_or_default()
    }

    pub async fn healthy_count(&self) -> usize {
        self.snapshot().await.iter().filter(|p| !p.parked).count()
    }
}
