// src/server/health.rs

use crate::config::ShardRef;
use crate::core::KvCommands;
use crate::core::manager::{ConnectionState, ShardRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// The result of probing one warm shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardHealth {
    Healthy,
    Unhealthy(String),
    /// The shard's manager had given up; it was evicted so the next probe reconnects.
    Evicted,
}

/// A task that keeps the configured warm shards connected by pinging them periodically.
pub struct HealthMonitor {
    registry: Arc<ShardRegistry>,
    shards: Vec<ShardRef>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(registry: Arc<ShardRegistry>, shards: Vec<ShardRef>, interval: Duration) -> Self {
        Self {
            registry,
            shards,
            interval,
        }
    }

    /// The main run loop. The first check happens immediately.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "Health monitor started for {} warm shard(s).",
            self.shards.len()
        );
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.check_all().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Health monitor shutting down.");
                    return;
                }
            }
        }
    }

    /// Probes every warm shard once, in configuration order.
    pub async fn check_all(&self) -> Vec<(ShardRef, ShardHealth)> {
        let mut results = Vec::with_capacity(self.shards.len());
        for shard in &self.shards {
            let health = self.check(shard).await;
            match &health {
                ShardHealth::Healthy => {
                    debug!(namespace = %shard.namespace, shard = %shard.shard, "Shard healthy")
                }
                ShardHealth::Unhealthy(reason) => warn!(
                    namespace = %shard.namespace,
                    shard = %shard.shard,
                    "Shard health check failed: {}", reason
                ),
                ShardHealth::Evicted => warn!(
                    namespace = %shard.namespace,
                    shard = %shard.shard,
                    "Shard gave up connecting; evicted for a fresh start"
                ),
            }
            results.push((shard.clone(), health));
        }
        results
    }

    async fn check(&self, shard: &ShardRef) -> ShardHealth {
        let client = match self.registry.get(&shard.namespace, &shard.shard) {
            Ok(client) => client,
            Err(e) => return ShardHealth::Unhealthy(e.to_string()),
        };
        match client.ping().await {
            Ok(_) => ShardHealth::Healthy,
            Err(e) => {
                let failed = self
                    .registry
                    .manager(&shard.namespace, &shard.shard)
                    .is_some_and(|m| m.state() == ConnectionState::Failed);
                if failed && self.registry.evict(&shard.namespace, &shard.shard).await {
                    ShardHealth::Evicted
                } else {
                    ShardHealth::Unhealthy(e.to_string())
                }
            }
        }
    }
}
