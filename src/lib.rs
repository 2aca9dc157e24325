// src/lib.rs

pub mod companion;
pub mod config;
pub mod core;
pub mod server;

// Re-export
pub use crate::core::manager::ShardRegistry;
