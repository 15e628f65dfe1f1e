//! Workflows worker binary.
//!
//! Receives jobs from a JetStream consumer and runs them with a pool of workers.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use workflow_tasks::tools::create_default_registry;
use worker_pool::{BrokerClient, JobProcessor, MemoryStore, WorkerConfig, WorkerGroup};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    tracing::info!("Starting workflows worker");

    let config = WorkerConfig::from_env()?;
    config.validate()?;
    tracing::info!(
        nats_url = %config.nats_url,
        stream = %config.nats_stream,
        subject = %config.job_subject(),
        consumer = %config.nats_consumer,
        concurrency = config.concurrency,
        notify_period = ?config.notify_period,
        "Worker configuration loaded"
    );

    let store = Arc::new(MemoryStore::new());
    if let Some(dir) = &config.workflows_dir {
        let loaded = store
            .load_workflows_dir(dir)
            .await
            .with_context(|| format!("loading workflows from {}", dir.display()))?;
        tracing::info!(dir = %dir.display(), loaded, "Workflow definitions loaded");
    }

    let broker = BrokerClient::connect(&config.nats_url, &config.nats_stream).await?;
    broker.create_stream(config.replicas).await?;
    broker
        .create_consumer(
            &config.nats_consumer,
            config.consumer_upsert,
            &config.consumer_settings(),
        )
        .await?;
    let subscription = Arc::new(broker.subscribe(&config.nats_consumer).await?);

    let registry = create_default_registry(broker.jetstream().clone(), broker.stream_name());
    tracing::debug!(executors = ?registry.list(), "Task executors registered");

    let processor = Arc::new(
        JobProcessor::new(store, Arc::new(registry)).with_persist_ephemeral(config.no_ephemeral),
    );

    let group = WorkerGroup::new(subscription, processor, config.notify_period);
    let cancel = CancellationToken::new();
    group.spawn_workers(config.concurrency, &cancel)?;

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = group.first_exit() => {
            tracing::warn!(worker_id = ?group.term_id(), "Worker exited, shutting down");
        }
    }

    cancel.cancel();
    match tokio::time::timeout(config.shutdown_timeout, group.all_exited()).await {
        Ok(()) => tracing::info!("All workers stopped"),
        Err(_) => tracing::warn!(
            remaining = group.live_workers(),
            timeout = ?config.shutdown_timeout,
            "Timed out waiting for workers"
        ),
    }

    if let Err(e) = broker.flush().await {
        tracing::warn!(error = %e, "Failed to flush NATS connection");
    }

    tracing::info!(first_exit = ?group.term_id(), "Worker stopped");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,worker_pool=debug,workflow_tasks=debug".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
