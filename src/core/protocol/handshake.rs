// src/core/protocol/handshake.rs

//! The connection handshake: negotiate RESP3 with `HELLO 3`, falling back to a `PING`
//! liveness probe when the companion does not know `HELLO`.

use super::command::CommandFrame;
use super::resp_frame::RespFrame;
use crate::core::GateError;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

/// The protocol version requested during capability negotiation.
pub const HELLO_PROTOCOL_VERSION: u32 = 3;

/// The only replies accepted from the liveness probe, byte for byte.
const PONG_SIMPLE: &[u8] = b"+PONG\r\n";
const PONG_BULK: &[u8] = b"$4\r\nPONG\r\n";

/// Anything that can send one command and read back exactly one reply frame.
///
/// The reply comes with the raw bytes it was decoded from so that mismatches can be
/// reported literally.
#[async_trait]
pub trait RequestReply: Send {
    async fn request(&mut self, cmd: &CommandFrame) -> Result<(RespFrame, Bytes), GateError>;
}

/// How the handshake was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// The companion answered `HELLO` with a map.
    Negotiated,
    /// The companion rejected `HELLO` as unknown and answered the `PING` probe.
    PingFallback,
}

/// Classification of the first handshake reply.
#[derive(Debug, PartialEq, Eq)]
enum HelloReply {
    Map,
    UnknownCommand,
    Other,
}

fn classify_hello_reply(frame: &RespFrame) -> HelloReply {
    match frame {
        RespFrame::Map(_) => HelloReply::Map,
        RespFrame::Error(msg) if msg.to_ascii_lowercase().contains("unknown command") => {
            HelloReply::UnknownCommand
        }
        _ => HelloReply::Other,
    }
}

/// Returns true when `raw` is exactly one of the accepted `PONG` replies.
pub fn is_pong(raw: &[u8]) -> bool {
    raw == PONG_SIMPLE || raw == PONG_BULK
}

/// Runs the capability handshake over `conn`.
pub async fn handshake<C>(conn: &mut C) -> Result<HandshakeOutcome, GateError>
where
    C: RequestReply + ?Sized,
{
    let hello = CommandFrame::new("HELLO").arg(HELLO_PROTOCOL_VERSION);
    let (frame, raw) = conn.request(&hello).await?;

    match classify_hello_reply(&frame) {
        HelloReply::Map => {
            debug!("HELLO {} accepted", HELLO_PROTOCOL_VERSION);
            Ok(HandshakeOutcome::Negotiated)
        }
        HelloReply::UnknownCommand => {
            info!("Companion does not support HELLO; falling back to PING probe.");
            probe(conn).await?;
            Ok(HandshakeOutcome::PingFallback)
        }
        HelloReply::Other => Err(GateError::Protocol {
            reason: "unexpected HELLO reply".into(),
            response: String::from_utf8_lossy(&raw).into_owned(),
        }),
    }
}

/// Sends `PING` and accepts only a literal `PONG` reply.
pub async fn probe<C>(conn: &mut C) -> Result<(), GateError>
where
    C: RequestReply + ?Sized,
{
    let (_, raw) = conn.request(&CommandFrame::new("PING")).await?;
    if is_pong(&raw) {
        Ok(())
    } else {
        Err(GateError::Protocol {
            reason: "unexpected PING reply".into(),
            response: String::from_utf8_lossy(&raw).into_owned(),
        })
    }
}
