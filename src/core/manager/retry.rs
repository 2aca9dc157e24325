// src/core/manager/retry.rs

//! Immutable retry and timeout settings for connection attempts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How many times to try, and how long to wait between tries.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(with = "humantime_serde", default = "default_fixed_delay")]
    pub fixed_delay: Duration,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_fixed_delay() -> Duration {
    Duration::from_millis(1000)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            fixed_delay: default_fixed_delay(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, fixed_delay: Duration) -> Self {
        Self {
            max_attempts,
            fixed_delay,
        }
    }

    /// The delay to sleep after `attempt` (1-based) failed, or `None` once the
    /// attempts are used up.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then_some(self.fixed_delay)
    }
}

/// Per-stage bounds applied to every attempt.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptTimeouts {
    /// Readiness of the channel and adapter.
    #[serde(with = "humantime_serde", default = "default_open_timeout")]
    pub open: Duration,
    /// The HELLO/PING exchange.
    #[serde(with = "humantime_serde", default = "default_handshake_timeout")]
    pub handshake: Duration,
}

fn default_open_timeout() -> Duration {
    Duration::from_secs(2)
}
fn default_handshake_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for AttemptTimeouts {
    fn default() -> Self {
        Self {
            open: default_open_timeout(),
            handshake: default_handshake_timeout(),
        }
    }
}
