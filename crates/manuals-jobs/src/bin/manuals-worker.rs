//! Standalone ingest worker.
//!
//! Connects to PostgreSQL and blob storage, starts the background worker,
//! and periodically reconciles stale jobs until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use manuals_core::defaults::RECONCILE_INTERVAL_SECS;
use manuals_db::{log_pool_metrics, Database, PoolConfig, StorageConfig};
use manuals_jobs::{
    IngestionOrchestrator, OrchestratorConfig, PatternDipGenerator, SidecarProcessor,
    WorkerBuilder, WorkerConfig,
};

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   RUST_LOG    - standard env filter (default: "manuals_jobs=debug,manuals_db=info")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "manuals_jobs=debug,manuals_db=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("manuals-worker.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false),
                )
                .init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let db = Database::connect_with_config(&database_url, PoolConfig::from_env())
        .await
        .context("failed to connect to database")?;

    if std::env::var("MIGRATE_ON_START")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
    {
        db.migrate().await.context("failed to run migrations")?;
        info!("Migrations applied");
    }

    let storage = StorageConfig::from_env()?.build()?;
    let processor = Arc::new(SidecarProcessor::from_env()?);
    let store = Arc::new(db.jobs.clone());
    let generator = Arc::new(PatternDipGenerator::new(store.clone(), storage.clone()));

    let reconcile_interval = std::env::var("RECONCILE_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(RECONCILE_INTERVAL_SECS)
        .max(1);

    let (orchestrator, worker) = WorkerBuilder::new()
        .with_config(WorkerConfig::from_env())
        .build(|queue| {
            IngestionOrchestrator::builder(store, Arc::new(db.systems.clone()))
                .with_storage(storage)
                .with_processor(processor)
                .with_intelligence(generator)
                .with_entity_store(Arc::new(db.entity_candidates.clone()))
                .with_queue(queue)
                .with_config(OrchestratorConfig::from_env())
                .build()
        });

    let handle = worker.start();
    info!(reconcile_interval_secs = reconcile_interval, "manuals-worker running");

    let mut ticker = tokio::time::interval(Duration::from_secs(reconcile_interval));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                log_pool_metrics(db.pool());
                match orchestrator.reconcile_default().await {
                    Ok(report) => {
                        for task in report.tasks() {
                            if let Err(e) = handle.queue().enqueue(task).await {
                                warn!(error = %e, "Failed to re-enqueue reconciled job");
                            }
                        }
                    }
                    Err(e) => error!(error = %e, "Reconciliation sweep failed"),
                }
            }
        }
    }

    handle
        .shutdown_and_wait()
        .await
        .context("ingest worker did not shut down cleanly")?;
    info!("manuals-worker stopped");
    Ok(())
}
