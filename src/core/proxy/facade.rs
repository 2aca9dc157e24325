// src/core/proxy/facade.rs

//! The caller side of the invocation boundary.

use super::call::{RemoteCall, RemoteReply};
use super::target::CallTarget;
use crate::core::GateError;
use crate::core::kv_commands::KvCommands;
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

/// Member names that introspection probes rather than calls. They are answered
/// locally and never forwarded.
pub const RESERVED_MEMBERS: &[&str] = &[
    "constructor",
    "then",
    "toString",
    "toJSON",
    "valueOf",
    "inspect",
];

// Calls queued at the boundary before callers start waiting to enqueue.
const BOUNDARY_QUEUE_DEPTH: usize = 64;

/// One marshalled call and the slot its marshalled reply goes into.
struct Envelope {
    payload: Bytes,
    reply: oneshot::Sender<Bytes>,
}

/// A handle that forwards every operation to a `CallTarget` hosted on its own task.
#[derive(Clone)]
pub struct RemoteKv {
    tx: mpsc::Sender<Envelope>,
    label: Arc<str>,
}

impl RemoteKv {
    /// Starts a host task serving `target` and returns a facade bound to it.
    /// The host stops once every facade clone has been dropped.
    pub fn spawn<T: CallTarget>(target: T, label: impl Into<String>) -> Self {
        let label: Arc<str> = Arc::from(label.into());
        let (tx, rx) = mpsc::channel(BOUNDARY_QUEUE_DEPTH);
        tokio::spawn(serve(Arc::new(target), rx, label.clone()));
        Self { tx, label }
    }

    /// Forwards `method(args...)` and returns the target's result unchanged.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, GateError> {
        if RESERVED_MEMBERS.contains(&method) {
            return Err(GateError::NoSuchMethod(method.to_string()));
        }

        let payload = RemoteCall::new(method, args).encode()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                payload,
                reply: reply_tx,
            })
            .await
            .map_err(|_| GateError::Internal(format!("remote target '{}' has shut down", self.label)))?;
        let reply = reply_rx
            .await
            .map_err(|_| GateError::Internal(format!("remote target '{}' dropped the call", self.label)))?;
        RemoteReply::decode(&reply)?.into_result()
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for RemoteKv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteKv")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Serves calls one at a time, in arrival order.
async fn serve<T: CallTarget>(target: Arc<T>, mut rx: mpsc::Receiver<Envelope>, label: Arc<str>) {
    debug!(host = %label, "Remote call host started");
    while let Some(envelope) = rx.recv().await {
        let reply = handle(target.as_ref(), &envelope.payload).await;
        if envelope.reply.send(reply).is_err() {
            debug!(host = %label, "Caller went away before the reply was ready");
        }
    }
    debug!(host = %label, "Remote call host stopped");
}

async fn handle<T: CallTarget + ?Sized>(target: &T, payload: &[u8]) -> Bytes {
    let result = match RemoteCall::decode(payload) {
        Ok(call) => target.call(&call.method, call.args).await,
        Err(e) => Err(e),
    };
    RemoteReply::from_result(result).encode().unwrap_or_else(|e| {
        error!("Failed to marshal reply: {}", e);
        Bytes::from_static(br#"{"status":"err","kind":"internal","message":"unencodable reply"}"#)
    })
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, GateError> {
    Ok(serde_json::from_value(value)?)
}

#[async_trait]
impl KvCommands for RemoteKv {
    async fn ping(&self) -> Result<String, GateError> {
        decode(self.call("ping", vec![]).await?)
    }

    async fn echo(&self, message: &str) -> Result<String, GateError> {
        decode(self.call("echo", vec![json!(message)]).await?)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, GateError> {
        decode(self.call("get", vec![json!(key)]).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), GateError> {
        self.call("set", vec![json!(key), json!(value)]).await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<i64, GateError> {
        decode(self.call("del", keys.iter().map(|k| json!(k)).collect()).await?)
    }

    async fn exists(&self, key: &str) -> Result<bool, GateError> {
        decode(self.call("exists", vec![json!(key)]).await?)
    }

    async fn incr(&self, key: &str) -> Result<i64, GateError> {
        decode(self.call("incr", vec![json!(key)]).await?)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, GateError> {
        decode(self.call("incr_by", vec![json!(key), json!(delta)]).await?)
    }

    async fn decr(&self, key: &str) -> Result<i64, GateError> {
        decode(self.call("decr", vec![json!(key)]).await?)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, GateError> {
        decode(self.call("expire", vec![json!(key), json!(seconds)]).await?)
    }

    async fn ttl(&self, key: &str) -> Result<i64, GateError> {
        decode(self.call("ttl", vec![json!(key)]).await?)
    }
}
