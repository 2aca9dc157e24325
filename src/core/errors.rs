// src/core/errors.rs

//! Defines the primary error type for the entire gateway.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The main error enum, representing every failure a connection, codec or proxy can report.
///
/// `std::io::Error` is wrapped in an `Arc` so the whole enum stays `Clone`; one attempt's
/// outcome is handed to every caller joined on it.
#[derive(Error, Debug, Clone)]
pub enum GateError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// The companion process is not reachable or the channel could not be obtained.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// A stage of a connection attempt exceeded its bound.
    #[error("Timed out during {stage} after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    /// The companion answered the handshake or probe with something unexpected.
    #[error("Protocol mismatch: {reason} (response: {response:?})")]
    Protocol { reason: String, response: String },

    /// The transport rejected a write. The connection is latched closed after this.
    #[error("Write failed: {0}")]
    Write(Arc<std::io::Error>),

    #[error("Not connected")]
    NotConnected,

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Client is not initialized")]
    NotInitialized,

    #[error("No such method '{0}'")]
    NoSuchMethod(String),

    #[error("Invalid argument for '{method}': {reason}")]
    InvalidArgument { method: String, reason: String },

    /// An error reply (`-ERR ...`) returned by the companion for a regular command.
    #[error("{0}")]
    Reply(String),

    #[error("Gave up after {attempts} connection attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<GateError> },

    #[error("Unknown selector '{0}'")]
    UnknownSelector(String),

    #[error("Connection manager has been destroyed")]
    Destroyed,

    #[error("Operation not allowed in the current state: {0}")]
    InvalidState(String),

    #[error("Internal Error: {0}")]
    Internal(String),
}

/// A coarse, serializable classification of a `GateError`, used to carry failures
/// across the remote invocation boundary.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connectivity,
    Timeout,
    Protocol,
    Write,
    NotInitialized,
    NoSuchMethod,
    InvalidArgument,
    Reply,
    Destroyed,
    Internal,
}

impl GateError {
    /// Classifies the error for transport across the proxy boundary.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GateError::Io(_)
            | GateError::Connectivity(_)
            | GateError::NotConnected
            | GateError::ConnectionClosed
            | GateError::RetriesExhausted { .. } => ErrorKind::Connectivity,
            GateError::Timeout { .. } => ErrorKind::Timeout,
            GateError::Protocol { .. } | GateError::InvalidFrame(_) | GateError::IncompleteData => {
                ErrorKind::Protocol
            }
            GateError::Write(_) => ErrorKind::Write,
            GateError::NotInitialized => ErrorKind::NotInitialized,
            GateError::NoSuchMethod(_) => ErrorKind::NoSuchMethod,
            GateError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            GateError::Reply(_) => ErrorKind::Reply,
            GateError::Destroyed => ErrorKind::Destroyed,
            GateError::UnknownSelector(_) | GateError::InvalidState(_) | GateError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Rebuilds an error on the calling side of the proxy boundary.
    ///
    /// Kinds that carry a payload keep the remote message; the rest collapse to their
    /// unit variant.
    pub fn from_remote(kind: ErrorKind, message: String) -> Self {
        match kind {
            // A remote stage timeout has no local stage to attach to.
            ErrorKind::Connectivity | ErrorKind::Timeout => GateError::Connectivity(message),
            ErrorKind::Protocol => GateError::Protocol {
                reason: message,
                response: String::new(),
            },
            ErrorKind::Write => GateError::Write(Arc::new(std::io::Error::other(message))),
            ErrorKind::NotInitialized => GateError::NotInitialized,
            ErrorKind::NoSuchMethod => GateError::NoSuchMethod(message),
            ErrorKind::InvalidArgument => GateError::InvalidArgument {
                method: String::new(),
                reason: message,
            },
            ErrorKind::Reply => GateError::Reply(message),
            ErrorKind::Destroyed => GateError::Destroyed,
            ErrorKind::Internal => GateError::Internal(message),
        }
    }

    /// The text an upward-facing layer may show. Diagnostic detail never leaves the gateway.
    pub fn public_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::NoSuchMethod | ErrorKind::InvalidArgument => "Bad Request",
            _ => "Internal Server Error",
        }
    }

    /// Builds a write error from the transport failure.
    pub fn write(e: std::io::Error) -> Self {
        GateError::Write(Arc::new(e))
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for GateError {
    fn from(e: std::io::Error) -> Self {
        GateError::Io(Arc::new(e))
    }
}

impl From<std::string::FromUtf8Error> for GateError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        GateError::InvalidFrame(format!("invalid UTF-8: {e}"))
    }
}

impl From<serde_json::Error> for GateError {
    fn from(e: serde_json::Error) -> Self {
        GateError::Internal(format!("JSON serialization/deserialization error: {e}"))
    }
}

impl From<tokio::task::JoinError> for GateError {
    fn from(e: tokio::task::JoinError) -> Self {
        GateError::Internal(format!("background task failed: {e}"))
    }
}
