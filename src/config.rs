// src/config.rs

//! Manages gateway configuration: loading from TOML and validation.

use crate::companion::CompanionAddr;
use crate::core::manager::{AttemptTimeouts, RetryPolicy};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;
use tracing::warn;

/// The namespace used when a configuration file defines none.
pub const DEFAULT_NAMESPACE: &str = "kv";

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    8879
}

/// One family of companion processes, addressed by a selector name.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NamespaceConfig {
    /// The fixed address every shard of this namespace connects to.
    #[serde(default = "default_companion_host")]
    pub host: String,
    #[serde(default = "default_companion_port")]
    pub port: u16,
    /// Program used to launch the companion. Unset means it is managed externally.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub timeouts: AttemptTimeouts,
}

fn default_companion_host() -> String {
    "127.0.0.1".to_string()
}
fn default_companion_port() -> u16 {
    7878
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            host: default_companion_host(),
            port: default_companion_port(),
            command: None,
            args: Vec::new(),
            retry: RetryPolicy::default(),
            timeouts: AttemptTimeouts::default(),
        }
    }
}

impl NamespaceConfig {
    pub fn addr(&self) -> CompanionAddr {
        CompanionAddr {
            host: self.host.clone(),
            port: self.port,
        }
    }
}

/// A shard the gateway connects to at startup and keeps health-checking.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ShardRef {
    #[serde(default = "default_namespace_name")]
    pub namespace: String,
    pub shard: String,
}

fn default_namespace_name() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// Represents the final, validated gateway configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(with = "humantime_serde", default = "default_health_check_interval")]
    pub health_check_interval: Duration,
    #[serde(default)]
    pub warm_shards: Vec<ShardRef>,
    #[serde(default = "default_namespaces")]
    pub namespaces: BTreeMap<String, NamespaceConfig>,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_health_check_interval() -> Duration {
    Duration::from_secs(30)
}
fn default_namespaces() -> BTreeMap<String, NamespaceConfig> {
    BTreeMap::from([(DEFAULT_NAMESPACE.to_string(), NamespaceConfig::default())])
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            metrics: MetricsConfig::default(),
            health_check_interval: default_health_check_interval(),
            warm_shards: Vec::new(),
            namespaces: default_namespaces(),
        }
    }
}

impl Config {
    /// Loads and validates the configuration at `path`.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid configuration in '{path}'"))
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration to ensure logical consistency.
    fn validate(&self) -> Result<()> {
        if self.namespaces.is_empty() {
            return Err(anyhow!("at least one namespace must be configured"));
        }
        for (name, ns) in &self.namespaces {
            if ns.host.trim().is_empty() {
                return Err(anyhow!("namespace '{name}': host cannot be empty"));
            }
            if ns.port == 0 {
                return Err(anyhow!("namespace '{name}': port cannot be 0"));
            }
            if ns.retry.max_attempts == 0 {
                return Err(anyhow!("namespace '{name}': retry.max_attempts cannot be 0"));
            }
            if ns.timeouts.open.is_zero() || ns.timeouts.handshake.is_zero() {
                return Err(anyhow!("namespace '{name}': timeouts must be non-zero"));
            }
            if ns.command.as_deref().is_some_and(|c| c.trim().is_empty()) {
                return Err(anyhow!("namespace '{name}': command cannot be empty"));
            }
            if ns.retry.fixed_delay > Duration::from_secs(60) {
                warn!(
                    "namespace '{}': retry delay of {:?} will make first requests very slow",
                    name, ns.retry.fixed_delay
                );
            }
        }
        for shard in &self.warm_shards {
            if !self.namespaces.contains_key(&shard.namespace) {
                return Err(anyhow!(
                    "warm shard '{}' refers to unknown namespace '{}'",
                    shard.shard,
                    shard.namespace
                ));
            }
        }
        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(anyhow!("metrics.port cannot be 0"));
        }
        if self.health_check_interval.is_zero() {
            return Err(anyhow!("health_check_interval cannot be 0"));
        }
        Ok(())
    }
}
