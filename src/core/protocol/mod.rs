// src/core/protocol/mod.rs

//! The RESP wire layer: frames, command encoding, and the connection handshake.

pub mod command;
pub mod handshake;
pub mod resp_frame;

pub use command::{CommandArg, CommandFrame};
pub use handshake::{HandshakeOutcome, handshake, probe};
pub use resp_frame::{RespFrame, RespFrameCodec};
