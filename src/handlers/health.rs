//! `GET /health` — liveness plus substrate health.

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub substrate: SubstrateHealth,
    pub database: Option<DatabaseHealth>,
}

#[derive(Debug, Serialize)]
pub struct SubstrateHealth {
    pub healthy_proxies: usize,
    pub known_hosts: usize,
    pub avg_host_rate_per_sec: f64,
    pub silver_queue_depth: usize,
}

#[derive(Debug, Serialize)]
pub struct DatabaseHealth {
    pub reachable: bool,
    pub latency_ms: Option<u64>,
}

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let healthy_proxies = state.fetch.proxy_pool().healthy_count().await;
    let host_rates = state.fetch.rate_limiters().snapshot().await;
    let avg_host_rate_per_sec = if host_rates.is_empty() {
        0.0
    } else {
        host_rates.iter().map(|h| h.rate_per_sec).sum::<f64>() / host_rates.len() as f64
    };

    let database = match &state.db_pool {
        Some(pool) => match crate::database::health_check(pool).await {
            Ok(latency) => Some(DatabaseHealth {
                reachable: true,
                latency_ms: Some(latency.as_millis() as u64),
            }),
            Err(_) => Some(DatabaseHealth {
                reachable: false,
                latency_ms: None,
            }),
        },
        None => None,
    };

    let degraded = database.as_ref().map(|db| !db.reachable).unwrap_or(false);

    Json(HealthResponse {
        status: if degraded { "degraded" } else { "healthy" }.to_string(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        substrate: SubstrateHealth {
            healthy_proxies,
            known_hosts: host_rates.len(),
            avg_host_rate_per_sec,
            silver_queue_depth: state.pipeline.depth(),
        },
        database,
    })
}
