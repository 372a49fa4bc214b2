use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Pool, Postgres};
use std::time::Duration;

use crate::config::DatabaseSettings;

pub type DatabasePool = Pool<Postgres>;

/// Build the shared connection pool from settings.
pub async fn create_pool(settings: &DatabaseSettings) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.connection_timeout)
        .idle_timeout(settings.idle_timeout)
        .connect(&settings.url)
        .await?;

    Ok(pool)
}

/// Apply pending migrations for all medallion layers.
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Round-trip liveness probe, returning the observed latency.
pub async fn health_check(pool: &PgPool) -> anyhow::Result<Duration> {
    let started = std::time::Instant::now();
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(started.elapsed())
}
