// src/core/client.rs

//! The shard client: RESP request/response over a `StreamAdapter`.
//!
//! One request is in flight at a time per client. Callers sharing a client queue on
//! its connection lock; there is no pipelining.

use crate::core::GateError;
use crate::core::kv_commands::KvCommands;
use crate::core::protocol::handshake::{HandshakeOutcome, RequestReply, handshake};
use crate::core::protocol::{CommandFrame, RespFrame, RespFrameCodec};
use crate::core::stream::{AdapterEvent, AdapterEvents, LinkState, ReadyState, StreamAdapter};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;

// Bound on a single command round-trip once the connection is established.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// A RESP conversation over an adapter: writes encoded commands and decodes replies
/// from the adapter's event stream, buffering across chunks.
pub struct RespConnection {
    adapter: Arc<StreamAdapter>,
    events: AdapterEvents,
    read_buf: BytesMut,
    codec: RespFrameCodec,
}

impl RespConnection {
    pub fn new(adapter: Arc<StreamAdapter>, events: AdapterEvents) -> Self {
        Self {
            adapter,
            events,
            read_buf: BytesMut::with_capacity(4096),
            codec: RespFrameCodec,
        }
    }

    /// Reads until one complete frame is buffered.
    async fn read_reply(&mut self) -> Result<(RespFrame, Bytes), GateError> {
        loop {
            match self.codec.decode_raw(&mut self.read_buf) {
                Ok(Some(decoded)) => return Ok(decoded),
                Ok(None) => {}
                Err(e) => {
                    // The stream position is lost; nothing after this can be trusted.
                    self.read_buf.clear();
                    return Err(self.adapter.destroy(Some(e)).await.unwrap_or(GateError::NotConnected));
                }
            }

            match self.events.next().await {
                Some(AdapterEvent::Data(chunk)) => self.read_buf.extend_from_slice(&chunk),
                Some(AdapterEvent::End) | None => return Err(GateError::ConnectionClosed),
                Some(AdapterEvent::Error(e)) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl RequestReply for RespConnection {
    async fn request(&mut self, cmd: &CommandFrame) -> Result<(RespFrame, Bytes), GateError> {
        self.adapter.write(cmd.encode()).await?;
        self.read_reply().await
    }
}

/// A cheaply cloneable handle to one established companion connection.
#[derive(Clone)]
pub struct KvClient {
    adapter: Arc<StreamAdapter>,
    conn: Arc<Mutex<RespConnection>>,
}

impl KvClient {
    pub fn new(adapter: StreamAdapter, events: AdapterEvents) -> Self {
        let adapter = Arc::new(adapter);
        let conn = RespConnection::new(adapter.clone(), events);
        Self {
            adapter,
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Runs the capability handshake on this connection.
    pub async fn handshake(&self) -> Result<HandshakeOutcome, GateError> {
        let mut conn = self.conn.lock().await;
        handshake(&mut *conn).await
    }

    /// Sends one command and returns its reply. Error replies become `GateError::Reply`.
    ///
    /// A round-trip that times out leaves an unread reply on the wire, so the
    /// connection is destroyed rather than reused.
    pub async fn execute(&self, cmd: CommandFrame) -> Result<RespFrame, GateError> {
        let mut conn = self.conn.lock().await;
        let (frame, _) = match tokio::time::timeout(COMMAND_TIMEOUT, conn.request(&cmd)).await {
            Ok(reply) => reply?,
            Err(_) => {
                warn!("Command '{}' timed out; discarding connection", cmd.name());
                let err = GateError::Timeout {
                    stage: "command",
                    after: COMMAND_TIMEOUT,
                };
                return Err(self.adapter.destroy(Some(err)).await.unwrap_or(GateError::NotConnected));
            }
        };
        match frame {
            RespFrame::Error(msg) => Err(GateError::Reply(msg)),
            other => Ok(other),
        }
    }

    /// True while both halves are open and no write has failed.
    pub fn is_usable(&self) -> bool {
        self.adapter.ready_state() == ReadyState::Open && self.adapter.link_state() == LinkState::Open
    }

    pub fn adapter(&self) -> &StreamAdapter {
        &self.adapter
    }

    pub async fn destroy(&self, cause: Option<GateError>) -> Option<GateError> {
        self.adapter.destroy(cause).await
    }
}

// --- Reply shape helpers ---

fn unexpected(cmd: &str, frame: &RespFrame) -> GateError {
    GateError::Protocol {
        reason: format!("unexpected reply to {cmd}"),
        response: format!("{frame:?}"),
    }
}

fn expect_integer(cmd: &str, frame: RespFrame) -> Result<i64, GateError> {
    match frame {
        RespFrame::Integer(i) => Ok(i),
        other => Err(unexpected(cmd, &other)),
    }
}

fn expect_text(cmd: &str, frame: RespFrame) -> Result<String, GateError> {
    match frame {
        RespFrame::SimpleString(_) | RespFrame::BulkString(_) => {
            frame.as_text().ok_or_else(|| unexpected(cmd, &frame))
        }
        other => Err(unexpected(cmd, &other)),
    }
}

#[async_trait]
impl KvCommands for KvClient {
    async fn ping(&self) -> Result<String, GateError> {
        let reply = self.execute(CommandFrame::new("PING")).await?;
        expect_text("PING", reply)
    }

    async fn echo(&self, message: &str) -> Result<String, GateError> {
        let reply = self.execute(CommandFrame::new("ECHO").arg(message)).await?;
        expect_text("ECHO", reply)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, GateError> {
        match self.execute(CommandFrame::new("GET").arg(key)).await? {
            RespFrame::Null => Ok(None),
            other => expect_text("GET", other).map(Some),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), GateError> {
        match self.execute(CommandFrame::new("SET").arg(key).arg(value)).await? {
            RespFrame::SimpleString(s) if s.eq_ignore_ascii_case("OK") => Ok(()),
            other => Err(unexpected("SET", &other)),
        }
    }

    async fn del(&self, keys: &[String]) -> Result<i64, GateError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let reply = self.execute(CommandFrame::new("DEL").args(keys)).await?;
        expect_integer("DEL", reply)
    }

    async fn exists(&self, key: &str) -> Result<bool, GateError> {
        let reply = self.execute(CommandFrame::new("EXISTS").arg(key)).await?;
        Ok(expect_integer("EXISTS", reply)? > 0)
    }

    async fn incr(&self, key: &str) -> Result<i64, GateError> {
        let reply = self.execute(CommandFrame::new("INCR").arg(key)).await?;
        expect_integer("INCR", reply)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, GateError> {
        let reply = self.execute(CommandFrame::new("INCRBY").arg(key).arg(delta)).await?;
        expect_integer("INCRBY", reply)
    }

    async fn decr(&self, key: &str) -> Result<i64, GateError> {
        let reply = self.execute(CommandFrame::new("DECR").arg(key)).await?;
        expect_integer("DECR", reply)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, GateError> {
        let reply = self.execute(CommandFrame::new("EXPIRE").arg(key).arg(seconds)).await?;
        Ok(expect_integer("EXPIRE", reply)? == 1)
    }

    async fn ttl(&self, key: &str) -> Result<i64, GateError> {
        let reply = self.execute(CommandFrame::new("TTL").arg(key)).await?;
        expect_integer("TTL", reply)
    }
}
