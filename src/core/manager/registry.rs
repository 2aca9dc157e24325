// src/core/manager/registry.rs

//! The per-shard registry that request handlers resolve clients through.

use super::connection::ConnectionManager;
use crate::companion::CompanionProvider;
use crate::config::NamespaceConfig;
use crate::core::GateError;
use crate::core::proxy::{KvCallTarget, RemoteKv};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
struct ShardEntry {
    manager: ConnectionManager,
    facade: RemoteKv,
}

/// Maps `(selector, shard key)` to exactly one connection manager and its call host.
///
/// Entries are created lazily on first lookup and live for as long as the registry,
/// unless evicted.
pub struct ShardRegistry {
    namespaces: BTreeMap<String, NamespaceConfig>,
    provider: Arc<dyn CompanionProvider>,
    shards: DashMap<(String, String), ShardEntry>,
}

impl ShardRegistry {
    pub fn new(
        namespaces: BTreeMap<String, NamespaceConfig>,
        provider: Arc<dyn CompanionProvider>,
    ) -> Self {
        Self {
            namespaces,
            provider,
            shards: DashMap::new(),
        }
    }

    /// Returns the client for `shard_key` within the namespace named by `selector`.
    ///
    /// The returned facade connects on its first call; lookups never block on the
    /// companion.
    pub fn get(&self, selector: &str, shard_key: &str) -> Result<RemoteKv, GateError> {
        let ns = self
            .namespaces
            .get(selector)
            .ok_or_else(|| GateError::UnknownSelector(selector.to_string()))?;

        let entry = self
            .shards
            .entry((selector.to_string(), shard_key.to_string()))
            .or_insert_with(|| {
                let label = format!("{selector}/{shard_key}");
                info!("Registering shard '{}'", label);
                let companion = self.provider.companion_for(selector, shard_key);
                let manager = ConnectionManager::new(
                    label.clone(),
                    companion,
                    ns.addr(),
                    ns.retry,
                    ns.timeouts,
                );
                let facade = RemoteKv::spawn(KvCallTarget::new(manager.clone()), label);
                ShardEntry { manager, facade }
            })
            .clone();
        Ok(entry.facade)
    }

    /// The manager behind a shard, if it has been looked up before.
    pub fn manager(&self, selector: &str, shard_key: &str) -> Option<ConnectionManager> {
        self.shards
            .get(&(selector.to_string(), shard_key.to_string()))
            .map(|entry| entry.manager.clone())
    }

    /// Removes a shard and destroys its connection. The next `get` starts afresh,
    /// which is the way out of a terminal `Failed` state.
    pub async fn evict(&self, selector: &str, shard_key: &str) -> bool {
        let removed = self
            .shards
            .remove(&(selector.to_string(), shard_key.to_string()));
        match removed {
            Some((_, entry)) => {
                entry.manager.destroy().await;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Destroys every shard connection.
    pub async fn shutdown(&self) {
        let managers: Vec<ConnectionManager> = self
            .shards
            .iter()
            .map(|entry| entry.manager.clone())
            .collect();
        self.shards.clear();
        for manager in managers {
            manager.destroy().await;
        }
        info!("All shard connections closed.");
    }
}
