//! Per-host adaptive rate limiting.
//!
//! Each host gets one owner task holding a continuously refilled token
//! bucket; callers acquire permits over a channel, so fairness is FIFO and
//! no lock is shared. The rate adapts multiplicatively: 429/503 shrink it
//! by `decrease_factor` and insert a cooldown (server `Retry-After` when
//! present, exponential otherwise); a window of consecutive successes grows
//! it back toward the initial rate.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Floor below which adaptation never pushes a host's rate.
const MIN_RATE_PER_SEC: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct HostLimiterConfig {
    pub initial_rate_per_sec: f64,
    pub bucket_capacity: f64,
    pub decrease_factor: f64,
    pub recovery_window: u32,
    pub default_cooldown: Duration,
}

impl Default for HostLimiterConfig {
    fn default() -> Self {
        Self {
            initial_rate_per_sec: 1.0,
            bucket_capacity: 4.0,
            decrease_factor: 0.5,
            recovery_window: 10,
            default_cooldown: Duration::from_secs(30),
        }
    }
}

/// Observed state of one host bucket, for health reporting.
#[derive(Debug, Clone)]
pub struct HostRateSnapshot {
    pub host: String,
    pub rate_per_sec: f64,
    pub in_cooldown: bool,
}

enum LimiterMsg {
    Acquire(oneshot::Sender<()>),
    Outcome {
        throttled: bool,
        retry_after: Option<Duration>,
    },
    Snapshot(oneshot::Sender<(f64, bool)>),
}

struct HostBucket {
    config: HostLimiterConfig,
    rate: f64,
    tokens: f64,
    last_refill: Instant,
    cooldown_until: Option<Instant>,
    consecutive_throttles: u32,
    success_streak: u32,
}

impl HostBucket {
    fn new(config: HostLimiterConfig) -> Self {
        Self {
            rate: config.initial_rate_per_sec,
            tokens: config.bucket_capacity,
            last_refill: Instant::now(),
            cooldown_until: None,
            consecutive_throttles: 0,
            success_streak: 0,
            config,
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.config.bucket_capacity);
        self.last_refill = now;
    }

    async fn wait_for_permit(&mut self) {
        if let Some(until) = self.cooldown_until {
            if Instant::now() < until {
                tokio::time::sleep_until(until).await;
            }
            self.cooldown_until = None;
            // The bucket idled through the cooldown; start from one permit.
            self.tokens = self.tokens.min(1.0);
            self.last_refill = Instant::now();
        }

        self.refill();
        if self.tokens < 1.0 {
            let deficit = 1.0 - self.tokens;
            let wait = Duration::from_secs_f64(deficit / self.rate);
            tokio::time::sleep(wait).await;
            self.refill();
        }
        self.tokens -= 1.0;
    }

    fn on_outcome(&mut self, throttled: bool, retry_after: Option<Duration>) {
        if throttled {
            self.success_streak = 0;
            self.consecutive_throttles += 1;
            self.rate = (self.rate * self.config.decrease_factor).max(MIN_RATE_PER_SEC);
            let cooldown = retry_after.unwrap_or_else(|| {
                // Exponential fallback when the server gave no Retry-After.
                let exponent = self.consecutive_throttles.saturating_sub(1).min(6);
                self.config.default_cooldown * 2u32.pow(exponent)
            });
            self.cooldown_until = Some(Instant::now() + cooldown);
        } else {
            self.consecutive_throttles = 0;
            self.success_streak += 1;
            if self.success_streak >= self.config.recovery_window
                && self.rate < self.config.initial_rate_per_sec
            {
                self.success_streak = 0;
                self.rate = (self.rate / self.config.decrease_factor)
                    .min(self.config.initial_rate_per_sec);
            }
        }
    }
}

async fn run_host_limiter(config: HostLimiterConfig, mut rx: mpsc::Receiver<LimiterMsg>) {
    let mut bucket = HostBucket::new(config);
    while let Some(msg) = rx.recv().await {
        match msg {
            LimiterMsg::Acquire(reply) => {
                bucket.wait_for_permit().await;
                let _ = reply.send(());
            }
            LimiterMsg::Outcome {
                throttled,
                retry_after,
            } => bucket.on_outcome(throttled, retry_after),
            LimiterMsg::Snapshot(reply) => {
                let in_cooldown = bucket
                    .cooldown_until
                    .map(|until| Instant::now() < until)
                    .unwrap_or(false);
                let _ = reply.send((bucket.rate, in_cooldown));
            }
        }
    }
}

/// Handle to all per-host limiter tasks; cheap to clone.
#[derive(Clone)]
pub struct HostRateLimiters {
    config: HostLimiterConfig,
    hosts: Arc<DashMap<String, mpsc::Sender<LimiterMsg>>>,
}

impl HostRateLimiters {
    pub fn new(config: HostLimiterConfig) -> Self {
        Self {
            config,
            hosts: Arc::new(DashMap::new()),
        }
    }

    fn sender_for(&self, host: &str) -> mpsc::Sender<LimiterMsg> {
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(64);
                tokio::spawn(run_host_limiter(self.config.clone(), rx));
                tx
            })
            .clone()
    }

    /// Wait for a permit to hit `host`. Resolves when the bucket allows one
    /// request; callers bound the wait with their own deadline.
    pub async fn acquire(&self, host: &str) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .sender_for(host)
            .send(LimiterMsg::Acquire(reply_tx))
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }

    /// Feed a request outcome back into the host's bucket. Awaiting the send
    /// keeps outcomes ordered with later acquires on the same host.
    pub async fn report(&self, host: &str, throttled: bool, retry_after: Option<Duration>) {
        let _ = self
            .sender_for(host)
            .send(LimiterMsg::Outcome {
                throttled,
                retry_after,
            })
            .await;
    }

    /// Current adaptive rate of every known host.
    pub async fn snapshot(&self) -> Vec<HostRateSnapshot> {
        let mut out = Vec::new();
        for entry in self.hosts.iter() {
            let (reply_tx, reply_rx) = oneshot::channel();
            if entry
                .value()
                .send(LimiterMsg::Snapshot(reply_tx))
                .await
                .is_ok()
            {
                if let Ok((rate_per_sec, in_cooldown)) = reply_rx.await {
                    out.push(HostRateSnapshot {
                        host: entry.key().clone(),
                        rate_per_sec,
                        in_cooldown,
                    });
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> HostLimiterConfig {
        HostLimiterConfig {
            initial_rate_per_sec: 100.0,
            bucket_capacity: 2.0,
            decrease_factor: 0.5,
            recovery_window: 3,
            default_cooldown: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn throttle_halves_rate_and_success_window_recovers_it() {
        let limiters = HostRateLimiters::new(fast_config());
        limiters.acquire("example.com").await;

        limiters
            .report("example.com", true, Some(Duration::from_millis(1)))
            .await;
        let snapshot = limiters.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert!((snapshot[0].rate_per_sec - 50.0).abs() < 1e-9);

        for _ in 0..3 {
            limiters.report("example.com", false, None).await;
        }
        let snapshot = limiters.snapshot().await;
        assert!((snapshot[0].rate_per_sec - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn rate_never_drops_below_floor() {
        let limiters = HostRateLimiters::new(fast_config());
        for _ in 0..64 {
            limiters
                .report("slow.example", true, Some(Duration::from_millis(1)))
                .await;
        }
        let snapshot = limiters.snapshot().await;
        assert!(snapshot[0].rate_per_sec >= MIN_RATE_PER_SEC);
    }

    #[tokio::test]
    async fn permits_are_spaced_by_the_bucket() {
        let config = HostLimiterConfig {
            initial_rate_per_sec: 20.0,
            bucket_capacity: 1.0,
            ..fast_config()
        };
        let limiters = HostRateLimiters::new(config);

        let started = std::time::Instant::now();
        for _ in 0..3 {
            limiters.acquire("spaced.example").await;
        }
        // First permit is free, the next two wait ~50ms each.
        assert!(started.elapsed() >= Duration::from_millis(80));
    }
}
