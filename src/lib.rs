//! Setlist Transition Graph Backend
//!
//! Medallion ingestion pipeline (Bronze → Silver → Gold → Operational) and
//! the unified scraping dispatcher that feeds it. Raw DJ setlists come in
//! through site adapters, get canonicalized into deduplicated tracks and
//! artists, and fold into a weighted directed graph of proven transitions.

use axum::{
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod services;
pub mod storage;

// Re-export commonly used types
pub use config::{AppConfig, ConfigError, Environment, StorageMode};
pub use database::{create_pool, health_check as db_health_check, run_migrations, DatabasePool};
pub use error::{AppError, ErrorResponse, Result};
pub use metrics::{metrics_handler, MetricsCollector};
pub use models::*;
pub use services::{
    AdapterRegistry, BronzeWriter, FetchService, GoldAggregator, OperationalMaterializer,
    Pipeline, ScrapeDispatcher, SilverCanonicalizer,
};
pub use storage::{MemoryStore, PostgresStore, Stores};

/// Shared application state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: ScrapeDispatcher,
    pub fetch: FetchService,
    pub pipeline: Pipeline,
    pub stores: Stores,
    pub metrics: MetricsCollector,
    /// Present in Postgres storage mode only.
    pub db_pool: Option<PgPool>,
}

/// Build the full service graph over the given stores.
pub fn build_state(
    config: &AppConfig,
    stores: Stores,
    db_pool: Option<PgPool>,
) -> anyhow::Result<AppState> {
    let metrics = MetricsCollector::new()?;
    let fetch = FetchService::new(config.fetch.clone()).with_metrics(metrics.clone());
    let registry = AdapterRegistry::with_defaults(fetch.clone());
    Ok(assemble_state(config, stores, db_pool, fetch, registry, metrics))
}

/// Same wiring with an explicit substrate and adapter registry; test suites
/// use this to point adapters at mock servers.
pub fn assemble_state(
    config: &AppConfig,
    stores: Stores,
    db_pool: Option<PgPool>,
    fetch: FetchService,
    registry: AdapterRegistry,
    metrics: MetricsCollector,
) -> AppState {
    let writer = BronzeWriter::new(stores.bronze.clone()).with_metrics(metrics.clone());
    let canonicalizer = SilverCanonicalizer::new(
        stores.bronze.clone(),
        stores.silver.clone(),
        &config.canonicalizer,
    )
    .with_metrics(metrics.clone());
    let aggregator = GoldAggregator::new(
        stores.silver.clone(),
        stores.gold.clone(),
        config.gold.clone(),
    )
    .with_metrics(metrics.clone());
    let materializer = OperationalMaterializer::new(
        stores.silver.clone(),
        stores.gold.clone(),
        stores.operational.clone(),
        config.operational.clone(),
    );
    let pipeline = Pipeline::start(
        canonicalizer,
        aggregator,
        materializer,
        &config.pipeline,
        Some(metrics.clone()),
    );
    let dispatcher = ScrapeDispatcher::new(
        registry,
        writer,
        pipeline.clone(),
        config.pipeline.clone(),
    )
    .with_metrics(metrics.clone());

    AppState {
        dispatcher,
        fetch,
        pipeline,
        stores,
        metrics,
        db_pool,
    }
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/scrape", post(handlers::scrape::scrape_handler))
        .route("/health", get(handlers::health::health_handler))
        .route("/stats", get(handlers::monitoring::stats_handler))
        .route("/jobs", get(handlers::monitoring::jobs_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
