// src/companion/mod.rs

//! The companion-process collaborator: the traits the gateway consumes to start the
//! key-value process and open split byte channels to it.

use crate::core::GateError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

pub mod local;

pub use local::{LocalCompanion, LocalProvider};

/// The readable half handed out by an opened channel.
pub type ChannelReader = Box<dyn AsyncRead + Send + Unpin>;
/// The writable half handed out by an opened channel.
pub type ChannelWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The fixed address the companion listens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionAddr {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for CompanionAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A split, asynchronous byte channel with an explicit readiness signal.
#[async_trait]
pub trait CompanionChannel: Send + 'static {
    /// Resolves once the channel can be used, or with the reason it never will be.
    async fn opened(&mut self) -> Result<(), GateError>;

    /// Hands out the reader and writer halves. Returns `None` before `opened` succeeded
    /// or once the halves have already been taken.
    fn take_halves(&mut self) -> Option<(ChannelReader, ChannelWriter)>;

    /// Releases whatever the channel still owns.
    async fn close(&mut self) -> Result<(), GateError>;
}

/// The externally orchestrated process hosting the key-value store.
#[async_trait]
pub trait CompanionProcess: Send + Sync + 'static {
    async fn is_running(&self) -> bool;

    async fn start(&self) -> Result<(), GateError>;

    async fn stop(&self) -> Result<(), GateError>;

    /// Opens a channel towards `addr`. The channel is not usable until `opened` resolves.
    async fn connect(&self, addr: &CompanionAddr) -> Result<Box<dyn CompanionChannel>, GateError>;
}

/// Resolves the companion process backing one shard of a namespace.
pub trait CompanionProvider: Send + Sync + 'static {
    fn companion_for(&self, namespace: &str, shard_key: &str) -> Arc<dyn CompanionProcess>;
}
