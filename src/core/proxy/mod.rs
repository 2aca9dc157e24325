// src/core/proxy/mod.rs

//! Remote method invocation across a task boundary.
//!
//! The caller side (`RemoteKv`) exposes the typed `KvCommands` interface and marshals
//! each call as a method name plus JSON arguments. The host side (`CallTarget`)
//! unmarshals it and dispatches by name. Name-based dispatch exists only at that
//! marshalled boundary.

pub mod call;
pub mod facade;
pub mod target;

pub use call::{RemoteCall, RemoteReply};
pub use facade::{RESERVED_MEMBERS, RemoteKv};
pub use target::{CallTarget, KvCallTarget, dispatch};
