// src/core/manager/connection.rs

//! Implements `ConnectionManager`, which owns the connection to one shard's companion.
//!
//! It acquires the companion process, opens a channel, wraps it in a `StreamAdapter`
//! and runs the handshake, retrying with a fixed delay up to a bounded number of
//! attempts. `init` is single-flight: concurrent callers share one attempt sequence
//! and observe the same outcome.

use super::retry::{AttemptTimeouts, RetryPolicy};
use super::single_flight::SingleFlight;
use crate::companion::{CompanionAddr, CompanionProcess};
use crate::core::GateError;
use crate::core::client::KvClient;
use crate::core::metrics;
use crate::core::protocol::HandshakeOutcome;
use crate::core::stream::StreamAdapter;
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// The lifecycle of a shard connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    /// Every attempt failed. Terminal: no further attempts are made.
    Failed,
    Destroyed,
}

struct Slot {
    status: ConnectionState,
    client: Option<KvClient>,
    terminal: Option<GateError>,
}

struct Inner {
    shard_key: String,
    companion: Arc<dyn CompanionProcess>,
    addr: CompanionAddr,
    policy: RetryPolicy,
    timeouts: AttemptTimeouts,
    slot: Mutex<Slot>,
    flight: SingleFlight<KvClient>,
    attempts: AtomicU32,
}

/// Owns the connection lifecycle for one shard key.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        shard_key: impl Into<String>,
        companion: Arc<dyn CompanionProcess>,
        addr: CompanionAddr,
        policy: RetryPolicy,
        timeouts: AttemptTimeouts,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                shard_key: shard_key.into(),
                companion,
                addr,
                policy,
                timeouts,
                slot: Mutex::new(Slot {
                    status: ConnectionState::Idle,
                    client: None,
                    terminal: None,
                }),
                flight: SingleFlight::new(),
                attempts: AtomicU32::new(0),
            }),
        }
    }

    /// Ensures a live client exists, connecting if necessary.
    ///
    /// Returns immediately when already connected. Concurrent callers join the
    /// attempt sequence already in flight instead of opening their own.
    pub async fn init(&self) -> Result<(), GateError> {
        if self.live_client().is_some() {
            return Ok(());
        }

        // The flight runs on its own task, so the attempts keep going if the
        // leading caller is cancelled.
        let this = self.clone();
        self.inner
            .flight
            .run(move || this.establish().boxed())
            .await
            .map(|_| ())
    }

    /// Returns the connected client, or `NotInitialized` if there is none.
    pub fn client(&self) -> Result<KvClient, GateError> {
        self.live_client().ok_or(GateError::NotInitialized)
    }

    /// Tears down the held client and refuses any further initialization.
    pub async fn destroy(&self) {
        let client = {
            let mut slot = self.inner.slot.lock();
            if slot.status == ConnectionState::Destroyed {
                return;
            }
            let client = slot.client.take();
            if slot.status == ConnectionState::Connected && client.is_some() {
                metrics::ACTIVE_CONNECTIONS.dec();
            }
            slot.status = ConnectionState::Destroyed;
            client
        };
        if let Some(client) = client {
            client.destroy(None).await;
        }
        info!(shard = %self.inner.shard_key, "Connection manager destroyed");
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.slot.lock().status
    }

    pub fn shard_key(&self) -> &str {
        &self.inner.shard_key
    }

    /// Total number of connection attempts made over this manager's lifetime.
    pub fn attempts_made(&self) -> u32 {
        self.inner.attempts.load(Ordering::Acquire)
    }

    fn live_client(&self) -> Option<KvClient> {
        let slot = self.inner.slot.lock();
        match (&slot.status, &slot.client) {
            (ConnectionState::Connected, Some(client)) if client.is_usable() => Some(client.clone()),
            _ => None,
        }
    }

    /// Runs the attempt sequence. Executed by the single-flight leader only.
    async fn establish(self) -> Result<KvClient, GateError> {
        let stale = {
            let mut slot = self.inner.slot.lock();
            let mut stale = None;
            match slot.status {
                ConnectionState::Failed => {
                    return Err(slot.terminal.clone().unwrap_or(GateError::NotInitialized));
                }
                ConnectionState::Destroyed => return Err(GateError::Destroyed),
                ConnectionState::Connected => {
                    if let Some(client) = slot.client.as_ref().filter(|c| c.is_usable()) {
                        return Ok(client.clone());
                    }
                    // The held connection latched an error or the peer closed it.
                    stale = slot.client.take();
                    if stale.is_some() {
                        metrics::ACTIVE_CONNECTIONS.dec();
                    }
                }
                ConnectionState::Idle | ConnectionState::Connecting => {}
            }
            slot.status = ConnectionState::Connecting;
            stale
        };
        if let Some(stale) = stale {
            info!(shard = %self.inner.shard_key, "Discarding unusable connection before reconnecting");
            stale.destroy(None).await;
        }

        let started = Instant::now();
        let max_attempts = self.inner.policy.max_attempts.max(1);
        let mut last_error = GateError::NotInitialized;

        for attempt in 1..=max_attempts {
            self.inner.attempts.fetch_add(1, Ordering::AcqRel);
            metrics::CONNECT_ATTEMPTS_TOTAL.inc();

            match self.attempt().await {
                Ok(client) => return self.install(client, attempt, started).await,
                Err(e) => {
                    warn!(
                        shard = %self.inner.shard_key,
                        attempt,
                        max_attempts,
                        "Connection attempt failed: {}", e
                    );
                    last_error = e;
                }
            }

            if self.state() == ConnectionState::Destroyed {
                return Err(GateError::Destroyed);
            }
            if let Some(delay) = self.inner.policy.delay_after(attempt) {
                tokio::time::sleep(delay).await;
            }
        }

        let err = GateError::RetriesExhausted {
            attempts: max_attempts,
            last: Box::new(last_error),
        };
        error!(shard = %self.inner.shard_key, "Giving up on companion connection: {}", err);
        let mut slot = self.inner.slot.lock();
        if slot.status != ConnectionState::Destroyed {
            slot.status = ConnectionState::Failed;
            slot.terminal = Some(err.clone());
        }
        Err(err)
    }

    /// One attempt. Anything built before a failure is destroyed before returning.
    async fn attempt(&self) -> Result<KvClient, GateError> {
        let inner = &self.inner;

        if !inner.companion.is_running().await {
            info!(shard = %inner.shard_key, "Companion not running; requesting start");
            let companion = inner.companion.clone();
            let shard = inner.shard_key.clone();
            tokio::spawn(async move {
                if let Err(e) = companion.start().await {
                    warn!(shard = %shard, "Companion start request failed: {}", e);
                }
            });
        }

        let channel = inner.companion.connect(&inner.addr).await.map_err(|e| {
            record_failure("connect");
            match e {
                GateError::Connectivity(_) => e,
                other => GateError::Connectivity(other.to_string()),
            }
        })?;

        let (adapter, events) = StreamAdapter::new(channel, inner.addr.to_string());
        adapter.set_no_delay(true);
        let opened = match tokio::time::timeout(inner.timeouts.open, adapter.open()).await {
            Ok(result) => result,
            Err(_) => Err(GateError::Timeout {
                stage: "open",
                after: inner.timeouts.open,
            }),
        };
        if let Err(e) = opened {
            record_failure("open");
            return Err(adapter.destroy(Some(e)).await.unwrap_or(GateError::NotConnected));
        }

        let client = KvClient::new(adapter, events);
        let handshake = match tokio::time::timeout(inner.timeouts.handshake, client.handshake()).await {
            Ok(result) => result,
            Err(_) => Err(GateError::Timeout {
                stage: "handshake",
                after: inner.timeouts.handshake,
            }),
        };
        match handshake {
            Ok(outcome) => {
                if outcome == HandshakeOutcome::PingFallback {
                    metrics::HANDSHAKE_FALLBACKS_TOTAL.inc();
                }
                debug!(shard = %inner.shard_key, ?outcome, "Handshake complete");
                Ok(client)
            }
            Err(e) => {
                record_failure("handshake");
                Err(client.destroy(Some(e)).await.unwrap_or(GateError::NotConnected))
            }
        }
    }

    async fn install(
        &self,
        client: KvClient,
        attempt: u32,
        started: Instant,
    ) -> Result<KvClient, GateError> {
        let destroyed = {
            let mut slot = self.inner.slot.lock();
            if slot.status == ConnectionState::Destroyed {
                true
            } else {
                slot.status = ConnectionState::Connected;
                slot.client = Some(client.clone());
                slot.terminal = None;
                false
            }
        };
        if destroyed {
            client.destroy(Some(GateError::Destroyed)).await;
            return Err(GateError::Destroyed);
        }

        metrics::ACTIVE_CONNECTIONS.inc();
        metrics::CONNECTIONS_ESTABLISHED_TOTAL.inc();
        metrics::CONNECT_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());
        info!(
            shard = %self.inner.shard_key,
            attempt,
            "Connected to companion at {}", self.inner.addr
        );
        Ok(client)
    }
}

fn record_failure(stage: &str) {
    metrics::CONNECT_FAILURES_TOTAL
        .with_label_values(&[stage])
        .inc();
}
