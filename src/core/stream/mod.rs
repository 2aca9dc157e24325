// src/core/stream/mod.rs

//! Adapts a split companion channel into a single duplex connection.

pub mod adapter;
pub mod link_state;

pub use adapter::{AdapterEvent, AdapterEvents, SocketOptions, StreamAdapter};
pub use link_state::{LinkState, ReadyState};
