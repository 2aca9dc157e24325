// src/core/kv_commands.rs

//! The explicit list of operations a shard client supports.
//!
//! Both the direct client and the remote facade implement this trait, so callers get
//! compile-time checked method names on either side of the invocation boundary.

use crate::core::GateError;
use async_trait::async_trait;

/// Every method name the remote boundary knows how to dispatch.
pub const KV_METHODS: &[&str] = &[
    "ping", "echo", "get", "set", "del", "exists", "incr", "incr_by", "decr", "expire", "ttl",
];

#[async_trait]
pub trait KvCommands: Send + Sync {
    async fn ping(&self) -> Result<String, GateError>;

    async fn echo(&self, message: &str) -> Result<String, GateError>;

    /// Returns `None` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<String>, GateError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), GateError>;

    /// Returns the number of keys removed.
    async fn del(&self, keys: &[String]) -> Result<i64, GateError>;

    async fn exists(&self, key: &str) -> Result<bool, GateError>;

    async fn incr(&self, key: &str) -> Result<i64, GateError>;

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, GateError>;

    async fn decr(&self, key: &str) -> Result<i64, GateError>;

    /// Returns false when the key does not exist.
    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, GateError>;

    /// `-2` if the key does not exist, `-1` if it has no expiry.
    async fn ttl(&self, key: &str) -> Result<i64, GateError>;
}
