// src/core/stream/link_state.rs

//! The lifecycle of a duplex link built from a split reader and writer.

use crate::core::GateError;

/// Where a link is in its lifecycle. Each half closes independently; the link is
/// `Closed` once both have, or as soon as it is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Opening,
    Open,
    /// The peer finished sending; writes are still allowed.
    HalfClosedRead,
    /// This side finished sending; reads are still delivered.
    HalfClosedWrite,
    Closed,
}

/// The socket-style view of a link, derived from its flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Opening,
    Open,
    Closed,
}

impl LinkState {
    /// The channel signalled readiness.
    pub fn on_opened(self) -> Result<Self, GateError> {
        match self {
            LinkState::Opening => Ok(LinkState::Open),
            other => Err(GateError::InvalidState(format!(
                "cannot open a link in state {other:?}"
            ))),
        }
    }

    /// The readable half reached end-of-stream.
    pub fn on_read_end(self) -> Self {
        match self {
            LinkState::Open => LinkState::HalfClosedRead,
            LinkState::HalfClosedWrite => LinkState::Closed,
            other => other,
        }
    }

    /// The writable half was finalized.
    pub fn on_write_end(self) -> Self {
        match self {
            LinkState::Open => LinkState::HalfClosedWrite,
            LinkState::HalfClosedRead => LinkState::Closed,
            other => other,
        }
    }

    /// The link was destroyed or its writer latched an error.
    pub fn on_closed(self) -> Self {
        LinkState::Closed
    }

    pub fn can_write(self) -> bool {
        matches!(self, LinkState::Open | LinkState::HalfClosedRead)
    }

    pub fn can_read(self) -> bool {
        matches!(self, LinkState::Open | LinkState::HalfClosedWrite)
    }
}
