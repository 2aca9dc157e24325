// src/core/manager/mod.rs

//! Connection lifecycle: bounded retries, single-flight initialization, and the
//! per-shard registry exposed to request handlers.

pub mod connection;
pub mod registry;
pub mod retry;
pub mod single_flight;

pub use connection::{ConnectionManager, ConnectionState};
pub use registry::ShardRegistry;
pub use retry::{AttemptTimeouts, RetryPolicy};
pub use single_flight::SingleFlight;
