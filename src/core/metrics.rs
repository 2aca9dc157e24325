// src/core/metrics.rs

//! Defines and registers Prometheus metrics for the gateway.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};
use tracing::error;

lazy_static! {
    // --- Connection Gauges ---
    /// The number of shard connections currently held by connection managers.
    pub static ref ACTIVE_CONNECTIONS: Gauge =
        register_gauge!("spinelgate_active_connections", "Number of live companion connections.").unwrap();


    // --- Connection Counters ---
    /// Every individual connection attempt, successful or not.
    pub static ref CONNECT_ATTEMPTS_TOTAL: Counter =
        register_counter!("spinelgate_connect_attempts_total", "Total number of connection attempts.").unwrap();
    /// Failed attempts, labeled by the stage that failed.
    pub static ref CONNECT_FAILURES_TOTAL: CounterVec =
        register_counter_vec!("spinelgate_connect_failures_total", "Total number of failed connection attempts, labeled by stage.", &["stage"]).unwrap();
    /// Attempts that completed the handshake.
    pub static ref CONNECTIONS_ESTABLISHED_TOTAL: Counter =
        register_counter!("spinelgate_connections_established_total", "Total number of established connections.").unwrap();
    /// Handshakes satisfied by the PING probe instead of HELLO.
    pub static ref HANDSHAKE_FALLBACKS_TOTAL: Counter =
        register_counter!("spinelgate_handshake_fallbacks_total", "Total number of handshakes that fell back to PING.").unwrap();
    /// Writes rejected by the transport.
    pub static ref WRITE_ERRORS_TOTAL: Counter =
        register_counter!("spinelgate_write_errors_total", "Total number of latched write failures.").unwrap();


    // --- Proxy Counters ---
    /// Calls forwarded through the invocation boundary, labeled by method.
    pub static ref PROXY_CALLS_TOTAL: CounterVec =
        register_counter_vec!("spinelgate_proxy_calls_total", "Total number of proxied calls, labeled by method.", &["method"]).unwrap();


    // --- Histograms ---
    /// Time from the first attempt to an established connection.
    pub static ref CONNECT_DURATION_SECONDS: Histogram =
        register_histogram!("spinelgate_connect_duration_seconds", "Time to establish a companion connection in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap_or_else(|e| {
        error!("Failed to encode metrics: {}", e);
        String::new()
    })
}
