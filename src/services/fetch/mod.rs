//! Fetch substrate: the process-wide resource manager shared by all source
//! adapters.
//!
//! Owns connection pooling, per-host adaptive rate limiting, retry with
//! backoff and jitter, header and proxy rotation, an optional JS rendering
//! path and the CAPTCHA oracle. Adapters never apply these policies
//! themselves.

pub mod captcha;
pub mod headers;
pub mod proxy;
pub mod rate_limiter;

use dashmap::DashMap;
use rand::Rng;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::metrics::MetricsCollector;
use crate::models::ScrapeErrorKind;

pub use captcha::{CaptchaChallenge, CaptchaError, CaptchaOracleClient, CaptchaSolution, ChallengeKind};
pub use headers::HeaderRotation;
pub use proxy::{ProxyPool, ProxyPoolConfig, ProxyStatus};
pub use rate_limiter::{HostLimiterConfig, HostRateLimiters, HostRateSnapshot};

/// Typed outcome classification for one fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("resource no longer resolves")]
    NotFound,

    #[error("blocked by anti-bot measures: {reason}")]
    Blocked { reason: String },

    #[error("rate limited by server")]
    RateLimited { retry_after: Option<Duration> },

    #[error("response failed structural expectations: {message}")]
    Malformed { message: String },

    #[error("transient failure: {message}")]
    Transient { message: String },

    #[error("request timed out")]
    Timeout,

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("request cancelled")]
    Cancelled,

    #[error("CAPTCHA challenge unsolvable")]
    Unsolvable,

    #[error("internal fetch error: {message}")]
    Internal { message: String },
}

impl FetchError {
    /// Mapping into the per-URL report taxonomy.
    pub fn kind(&self) -> ScrapeErrorKind {
        match self {
            Self::NotFound => ScrapeErrorKind::NotFound,
            Self::Blocked { .. } => ScrapeErrorKind::Blocked,
            Self::RateLimited { .. } => ScrapeErrorKind::RateLimited,
            Self::Malformed { .. } => ScrapeErrorKind::Malformed,
            Self::Transient { .. } | Self::Timeout => ScrapeErrorKind::Transient,
            Self::DeadlineExceeded => ScrapeErrorKind::DeadlineExceeded,
            Self::Cancelled => ScrapeErrorKind::Cancelled,
            Self::Unsolvable => ScrapeErrorKind::Unsolvable,
            Self::Internal { .. } => ScrapeErrorKind::Internal,
        }
    }

    /// Whether the substrate may retry this failure at all.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Blocked { .. } | Self::RateLimited { .. } | Self::Transient { .. } | Self::Timeout
        )
    }

    /// Attempts charged against the retry budget. Timeouts count double.
    fn budget_cost(&self) -> u32 {
        match self {
            Self::Timeout => 2,
            _ => 1,
        }
    }
}

/// One outbound request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    /// Hard deadline propagated from the dispatcher; aborts, never retried past.
    pub deadline: Option<Instant>,
    pub max_retries: u32,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            deadline: None,
            max_retries: 3,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Deserialize)]
struct RenderResponse {
    html: String,
}

/// Markers that a blocked page is fronting a solvable challenge.
const CAPTCHA_MARKERS: [&str; 3] = ["captcha", "cf-challenge", "g-recaptcha"];

/// Shared fetch engine; cheap to clone.
#[derive(Clone)]
pub struct FetchService {
    config: Arc<FetchConfig>,
    limiters: HostRateLimiters,
    proxies: ProxyPool,
    headers: HeaderRotation,
    captcha: CaptchaOracleClient,
    /// One pooled client per proxy endpoint, plus the direct client at "".
    clients: Arc<DashMap<String, Client>>,
    metrics: Option<MetricsCollector>,
}

impl FetchService {
    pub fn new(config: FetchConfig) -> Self {
        let limiters = HostRateLimiters::new(HostLimiterConfig {
            initial_rate_per_sec: config.initial_rate_per_sec,
            bucket_capacity: config.bucket_capacity,
            decrease_factor: config.decrease_factor,
            recovery_window: config.recovery_window,
            default_cooldown: config.default_cooldown,
        });
        let proxies = ProxyPool::new(ProxyPoolConfig {
            endpoints: config.proxies.clone(),
            park_threshold: config.proxy_park_threshold,
            park_cooldown: config.proxy_park_cooldown,
        });
        let captcha = CaptchaOracleClient::new(config.captcha.clone());

        Self {
            config: Arc::new(config),
            limiters,
            proxies,
            headers: HeaderRotation::new(),
            captcha,
            clients: Arc::new(DashMap::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn rate_limiters(&self) -> &HostRateLimiters {
        &self.limiters
    }

    pub fn proxy_pool(&self) -> &ProxyPool {
        &self.proxies
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<Client, FetchError> {
        let key = proxy.unwrap_or("").to_string();
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .pool_max_idle_per_host(8)
            .timeout(self.config.request_timeout);
        if let Some(proxy_url) = proxy {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| FetchError::Internal {
                message: format!("invalid proxy '{}': {}", proxy_url, e),
            })?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build().map_err(|e| FetchError::Internal {
            message: format!("client build failed: {}", e),
        })?;
        self.clients.insert(key, client.clone());
        Ok(client)
    }

    /// Fetch a URL through the full policy stack.
    pub async fn get(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let url = Url::parse(&request.url).map_err(|e| FetchError::Malformed {
            message: format!("invalid url '{}': {}", request.url, e),
        })?;
        let host = url
            .host_str()
            .ok_or_else(|| FetchError::Malformed {
                message: format!("url without host: {}", request.url),
            })?
            .to_string();

        let mut attempts_used: u32 = 0;
        let mut attempt_index: u32 = 0;
        let mut current_proxy = self.proxies.select(None).await;
        let mut previous_blocked_proxy: Option<Option<String>> = None;
        let mut captcha_already_solved = false;

        loop {
            if deadline_passed(request.deadline) {
                return Err(FetchError::DeadlineExceeded);
            }

            self.acquire_permit(&host, request.deadline).await?;

            let attempt = self
                .attempt(&url, &host, current_proxy.as_deref(), request.deadline)
                .await;

            let (error, challenge) = match attempt {
                Ok(response) => return Ok(response),
                Err(failed) => (failed.error, failed.challenge),
            };

            match &error {
                FetchError::NotFound
                | FetchError::Malformed { .. }
                | FetchError::DeadlineExceeded
                | FetchError::Cancelled
                | FetchError::Internal { .. }
                | FetchError::Unsolvable => return Err(error),
                _ => {}
            }

            // A failure at the hard deadline is an abort, not a retry case.
            if deadline_passed(request.deadline) {
                return Err(FetchError::DeadlineExceeded);
            }

            if let FetchError::Blocked { .. } = &error {
                let escalate = previous_blocked_proxy
                    .as_ref()
                    .map(|prev| *prev != current_proxy)
                    .unwrap_or(false);
                previous_blocked_proxy = Some(current_proxy.clone());

                if escalate && !captcha_already_solved {
                    if let Some(challenge) = challenge {
                        match self.solve_captcha(&challenge).await {
                            Ok(_) => {
                                captcha_already_solved = true;
                                debug!(host = %host, "CAPTCHA solved, retrying request");
                            }
                            Err(CaptchaError::Unsolvable) => return Err(FetchError::Unsolvable),
                            Err(e) => {
                                warn!(host = %host, error = %e, "CAPTCHA path failed");
                            }
                        }
                    }
                }

                // Rotate proxy and fingerprint before the next attempt.
                let next = self.proxies.select(current_proxy.as_deref()).await;
                if next != current_proxy {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_proxy_rotation();
                    }
                }
                current_proxy = next;
                self.headers.rotate(&host);
            } else {
                previous_blocked_proxy = None;
            }

            attempts_used += error.budget_cost();
            if attempts_used > request.max_retries {
                return Err(error);
            }
            if let Some(metrics) = &self.metrics {
                metrics.record_fetch_retry(error.kind().as_str());
            }

            let delay = self.backoff_delay(attempt_index);
            attempt_index += 1;
            if !self.sleep_within_deadline(delay, request.deadline).await {
                return Err(FetchError::DeadlineExceeded);
            }
        }
    }

    /// JS-capable rendering path for pages that need a browser.
    pub async fn render(&self, url: &str, deadline: Option<Instant>) -> Result<String, FetchError> {
        let endpoint = self
            .config
            .render_endpoint
            .as_deref()
            .ok_or_else(|| FetchError::Internal {
                message: "no render endpoint configured".to_string(),
            })?;

        if deadline_passed(deadline) {
            return Err(FetchError::DeadlineExceeded);
        }

        let client = self.client_for(None)?;
        let response = client
            .post(format!("{}/render", endpoint.trim_end_matches('/')))
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Transient {
                        message: e.to_string(),
                    }
                }
            })?;

        if !response.status().is_success() {
            return Err(FetchError::Transient {
                message: format!("render endpoint returned {}", response.status()),
            });
        }

        let rendered: RenderResponse = response.json().await.map_err(|e| FetchError::Malformed {
            message: format!("render response decode: {}", e),
        })?;
        Ok(rendered.html)
    }

    /// Submit a challenge to the oracle; low-confidence answers fail.
    pub async fn solve_captcha(
        &self,
        challenge: &CaptchaChallenge,
    ) -> Result<CaptchaSolution, CaptchaError> {
        let result = self.captcha.solve(challenge).await;
        if let Some(metrics) = &self.metrics {
            let outcome = match &result {
                Ok(_) => "solved",
                Err(CaptchaError::LowConfidence { .. }) => "low_confidence",
                Err(CaptchaError::Unsolvable) => "unsolvable",
                Err(_) => "error",
            };
            metrics.record_captcha_attempt(outcome);
        }
        result
    }

    async fn acquire_permit(
        &self,
        host: &str,
        deadline: Option<Instant>,
    ) -> Result<(), FetchError> {
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, self.limiters.acquire(host))
                .await
                .map_err(|_| FetchError::DeadlineExceeded),
            None => {
                self.limiters.acquire(host).await;
                Ok(())
            }
        }
    }

    async fn attempt(
        &self,
        url: &Url,
        host: &str,
        proxy: Option<&str>,
        deadline: Option<Instant>,
    ) -> Result<FetchResponse, FailedAttempt> {
        let client = self.client_for(proxy).map_err(FailedAttempt::bare)?;
        let header_set = self.headers.session_for(host);

        let mut per_attempt = self.config.request_timeout;
        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(FailedAttempt::bare(FetchError::DeadlineExceeded));
            }
            per_attempt = per_attempt.min(remaining);
        }

        let send = client
            .get(url.clone())
            .header(USER_AGENT, header_set.user_agent)
            .header(ACCEPT, header_set.accept)
            .header(ACCEPT_LANGUAGE, header_set.accept_language)
            .send();

        let response = match tokio::time::timeout(per_attempt, send).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                self.report_attempt(host, proxy, false, false, None).await;
                let error = if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Transient {
                        message: e.to_string(),
                    }
                };
                return Err(FailedAttempt::bare(error));
            }
            Err(_) => {
                self.report_attempt(host, proxy, false, false, None).await;
                return Err(FailedAttempt::bare(FetchError::Timeout));
            }
        };

        let status = response.status();
        if status.is_success() {
            self.report_attempt(host, proxy, true, false, None).await;
            let body = response.text().await.map_err(|e| {
                FailedAttempt::bare(FetchError::Transient {
                    message: format!("body read failed: {}", e),
                })
            })?;
            Ok(FetchResponse {
                status: status.as_u16(),
                body,
            })
        } else if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            // The proxy and host behaved; the resource is simply gone.
            self.report_attempt(host, proxy, true, false, None).await;
            Err(FailedAttempt::bare(FetchError::NotFound))
        } else if status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::SERVICE_UNAVAILABLE
        {
            let retry_after = parse_retry_after(&response);
            self.report_attempt(host, proxy, false, true, retry_after).await;
            if let Some(metrics) = &self.metrics {
                metrics.record_throttle(host);
            }
            Err(FailedAttempt::bare(FetchError::RateLimited { retry_after }))
        } else if status.is_client_error() {
            self.report_attempt(host, proxy, false, false, None).await;
            let body = response.text().await.unwrap_or_default();
            let challenge = extract_challenge(&body);
            Err(FailedAttempt {
                error: FetchError::Blocked {
                    reason: format!("status {}", status),
                },
                challenge,
            })
        } else {
            self.report_attempt(host, proxy, false, false, None).await;
            Err(FailedAttempt::bare(FetchError::Transient {
                message: format!("status {}", status),
            }))
        }
    }

    async fn report_attempt(
        &self,
        host: &str,
        proxy: Option<&str>,
        success: bool,
        throttled: bool,
        retry_after: Option<Duration>,
    ) {
        self.limiters.report(host, throttled, retry_after).await;
        if let Some(proxy) = proxy {
            self.proxies.report(proxy, success).await;
        }
    }

    /// `base * 2^attempt + uniform(0, jitter)`, capped at the configured max.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponential = self
            .config
            .retry_base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
            .min(self.config.retry_max_delay);
        let jitter_ms = self.config.retry_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        exponential + jitter
    }

    /// Sleep for `delay`, but never past the deadline. Returns false when the
    /// deadline cut the sleep short.
    async fn sleep_within_deadline(&self, delay: Duration, deadline: Option<Instant>) -> bool {
        match deadline {
            Some(deadline) => {
                let wake = Instant::now() + delay;
                if wake >= deadline {
                    tokio::time::sleep_until(deadline).await;
                    false
                } else {
                    tokio::time::sleep(delay).await;
                    true
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }
}

struct FailedAttempt {
    error: FetchError,
    challenge: Option<CaptchaChallenge>,
}

impl FailedAttempt {
    fn bare(error: FetchError) -> Self {
        Self {
            error,
            challenge: None,
        }
    }
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.map(|d| Instant::now() >= d).unwrap_or(false)
}

fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn extract_challenge(body: &str) -> Option<CaptchaChallenge> {
    let lowered = body.to_lowercase();
    if CAPTCHA_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        Some(CaptchaChallenge {
            kind: ChallengeKind::Text,
            payload: body.as_bytes().to_vec(),
        })
    } else {
        None
    }
}
