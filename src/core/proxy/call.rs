// src/core/proxy/call.rs

//! The wire shape of a proxied call and its reply.

use crate::core::GateError;
use crate::core::errors::ErrorKind;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A method name and its arguments, in call order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl RemoteCall {
    pub fn new(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }

    pub fn encode(&self) -> Result<Bytes, GateError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, GateError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// The outcome of a proxied call. Failures travel as a kind plus a message.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RemoteReply {
    Ok { value: Value },
    Err { kind: ErrorKind, message: String },
}

impl RemoteReply {
    pub fn from_result(result: Result<Value, GateError>) -> Self {
        match result {
            Ok(value) => RemoteReply::Ok { value },
            Err(e) => RemoteReply::Err {
                kind: e.kind(),
                message: remote_message(&e),
            },
        }
    }

    pub fn into_result(self) -> Result<Value, GateError> {
        match self {
            RemoteReply::Ok { value } => Ok(value),
            RemoteReply::Err { kind, message } => Err(GateError::from_remote(kind, message)),
        }
    }

    pub fn encode(&self) -> Result<Bytes, GateError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, GateError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// The payload that lets `GateError::from_remote` rebuild the same variant.
fn remote_message(e: &GateError) -> String {
    match e {
        GateError::NoSuchMethod(s) | GateError::Reply(s) | GateError::Connectivity(s) => s.clone(),
        other => other.to_string(),
    }
}
