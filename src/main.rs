use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use trackgraph_backend::{
    build_state, create_pool, create_router, run_migrations, AppConfig, Pipeline, StorageMode,
    Stores,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,trackgraph_backend=debug")),
        )
        .init();

    let config = AppConfig::from_env().context("configuration invalid")?;

    let (stores, db_pool) = match config.storage_mode {
        StorageMode::Postgres => {
            let pool = create_pool(&config.database)
                .await
                .context("database unavailable")?;
            run_migrations(&pool).await.context("migrations failed")?;
            (Stores::postgres(pool.clone()), Some(pool))
        }
        StorageMode::Memory => {
            info!("Running on the in-memory store; nothing will be persisted");
            (Stores::memory(), None)
        }
    };

    let state = build_state(&config, stores, db_pool)?;
    let pipeline = state.pipeline.clone();
    let app = create_router(state);

    let bind_address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("cannot bind {}", bind_address))?;
    info!(address = %bind_address, "Dispatcher listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(pipeline))
        .await?;

    Ok(())
}

/// Wait for Ctrl-C, then drain the pipeline stages.
async fn shutdown_signal(pipeline: Pipeline) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    info!("Shutdown requested");
    pipeline.shutdown();
}
