//! CAPTCHA oracle client.
//!
//! The solver is an external black box: it takes an image or text challenge
//! and returns an answer with a confidence score. Answers below the
//! configured confidence are treated as blocks, not solutions.

use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::config::CaptchaConfig;
use crate::services::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    Image,
    Text,
}

/// A challenge extracted from a blocked page.
#[derive(Debug, Clone)]
pub struct CaptchaChallenge {
    pub kind: ChallengeKind,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct CaptchaSolution {
    pub answer: String,
    pub confidence: f64,
}

#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("no CAPTCHA oracle configured")]
    NotConfigured,

    #[error("CAPTCHA oracle circuit is open")]
    CircuitOpen,

    #[error("CAPTCHA answer confidence {confidence:.2} below threshold")]
    LowConfidence { confidence: f64 },

    #[error("CAPTCHA oracle marked the challenge unsolvable")]
    Unsolvable,

    #[error("CAPTCHA oracle request failed: {0}")]
    Request(String),
}

#[derive(Serialize)]
struct SolveRequest<'a> {
    kind: ChallengeKind,
    challenge: &'a str,
}

#[derive(Deserialize)]
struct SolveResponse {
    answer: Option<String>,
    confidence: f64,
}

/// Client for the external solving service; cheap to clone.
#[derive(Clone)]
pub struct CaptchaOracleClient {
    client: Client,
    config: CaptchaConfig,
    breaker: Arc<CircuitBreaker>,
}

impl CaptchaOracleClient {
    pub fn new(config: CaptchaConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            config,
            breaker: Arc::new(CircuitBreaker::new(
                "captcha-oracle",
                CircuitBreakerConfig::default(),
            )),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.endpoint.is_some()
    }

    /// Submit a challenge and return a solution meeting the confidence bar.
    pub async fn solve(&self, challenge: &CaptchaChallenge) -> Result<CaptchaSolution, CaptchaError> {
        let endpoint = self
            .config
            .endpoint
            .as_deref()
            .ok_or(CaptchaError::NotConfigured)?;

        if !self.breaker.can_execute() {
            return Err(CaptchaError::CircuitOpen);
        }

        let encoded = base64::engine::general_purpose::STANDARD.encode(&challenge.payload);
        let body = SolveRequest {
            kind: challenge.kind,
            challenge: &encoded,
        };

        let response = self
            .client
            .post(format!("{}/solve", endpoint.trim_end_matches('/')))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                self.breaker.record_failure();
                CaptchaError::Request(e.to_string())
            })?;

        if !response.status().is_success() {
            self.breaker.record_failure();
            return Err(CaptchaError::Request(format!(
                "oracle returned {}",
                response.status()
            )));
        }

        let solved: SolveResponse = response.json().await.map_err(|e| {
            self.breaker.record_failure();
            CaptchaError::Request(e.to_string())
        })?;
        self.breaker.record_success();

        let answer = solved.answer.ok_or(CaptchaError::Unsolvable)?;
        if solved.confidence < self.config.min_confidence {
            return Err(CaptchaError::LowConfidence {
                confidence: solved.confidence,
            });
        }

        Ok(CaptchaSolution {
            answer,
            confidence: solved.confidence,
        })
    }
}
