// src/core/mod.rs

//! The central module containing the connection, protocol and invocation logic of
//! SpinelGate.

pub mod client;
pub mod errors;
pub mod kv_commands;
pub mod manager;
pub mod metrics;
pub mod protocol;
pub mod proxy;
pub mod stream;

pub use errors::GateError;
pub use kv_commands::KvCommands;
