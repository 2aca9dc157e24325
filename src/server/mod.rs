// src/server/mod.rs

//! The gateway runner: builds the shard registry, starts the background tasks and
//! waits for a shutdown signal.

use crate::companion::LocalProvider;
use crate::config::Config;
use crate::core::manager::ShardRegistry;
use anyhow::Result;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info};

pub mod health;
pub mod metrics_server;

/// Runs the gateway until SIGINT or SIGTERM.
pub async fn run(config: Config) -> Result<()> {
    let provider = Arc::new(LocalProvider::new(config.namespaces.clone()));
    let registry = Arc::new(ShardRegistry::new(
        config.namespaces.clone(),
        provider.clone(),
    ));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut background_tasks = JoinSet::new();

    if config.metrics.enabled {
        let port = config.metrics.port;
        let shutdown_rx = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            metrics_server::run_metrics_server(port, shutdown_rx).await;
        });
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    if config.warm_shards.is_empty() {
        info!("No warm shards configured; connections open on first use.");
    } else {
        let monitor = health::HealthMonitor::new(
            registry.clone(),
            config.warm_shards.clone(),
            config.health_check_interval,
        );
        let shutdown_rx = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            monitor.run(shutdown_rx).await;
        });
    }

    info!(
        "SpinelGate ready with {} namespace(s).",
        config.namespaces.len()
    );

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received, initiating graceful shutdown."),
        _ = sigterm.recv() => info!("SIGTERM received, initiating graceful shutdown."),
    }

    info!("Shutting down. Sending signal to all tasks.");
    if shutdown_tx.send(()).is_err() {
        // No subscribers: nothing was spawned.
        info!("No background tasks to notify.");
    }
    while let Some(joined) = background_tasks.join_next().await {
        if let Err(e) = joined {
            error!("Background task ended abnormally: {}", e);
        }
    }

    registry.shutdown().await;
    provider.stop_all().await;
    info!("Shutdown complete.");
    Ok(())
}
