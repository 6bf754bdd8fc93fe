use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;

use mammoth_durable::persistence::PostgresJobStore;
use mammoth_durable::queue::HttpQueueClient;
use mammoth_durable::shutdown::{install_shutdown_handler, ShutdownTriggers};
use mammoth_durable::worker::WorkerPool;
use mammoth_worker::{init_telemetry, MammothConfig, SimulatedWork, TelemetryConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    // Configure via environment variables:
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "mammoth_worker=info,mammoth_durable=info")
    init_telemetry(TelemetryConfig::from_env()).context("Failed to initialize logging")?;

    tracing::info!("Starting Mammoth application...");

    let config = MammothConfig::from_env().context("Invalid configuration")?;

    tracing::info!(
        queue_url = %config.queue.base_url,
        workers = config.pool.pool_size,
        fetch_backoff_ms = config.pool.fetch_backoff.as_millis(),
        "Configuration loaded"
    );

    let db = PgPoolOptions::new()
        .max_connections(config.max_db_connections())
        .connect(&config.database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    let store = Arc::new(PostgresJobStore::new(db));
    store
        .migrate()
        .await
        .context("Failed to run database migrations")?;

    let source = HttpQueueClient::new(config.queue.clone()).context("Failed to build queue client")?;
    let handler = SimulatedWork::new(config.simulated.clone());

    let pool = WorkerPool::new(
        store.clone(),
        Arc::new(source),
        Arc::new(handler),
        config.pool.clone(),
    );
    pool.start().await.context("Failed to start worker pool")?;

    let trigger = install_shutdown_handler(pool.stop_token(), ShutdownTriggers::default());
    tracing::info!("Press 'q' then Enter, or Ctrl-C, to stop");

    // Blocks until a trigger fires and every worker has finished its current job
    let report = pool.await_drain().await?;
    if let Err(e) = trigger.await {
        tracing::warn!(error = %e, "Shutdown handler ended abnormally");
    }
    store.pool().close().await;

    tracing::info!(
        completed = report.jobs_completed(),
        failed = report.jobs_failed(),
        abandoned = report.jobs_abandoned(),
        dropped = report.items_dropped(),
        "All workers have been stopped."
    );
    Ok(())
}
