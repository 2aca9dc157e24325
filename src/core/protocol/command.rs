// src/core/protocol/command.rs

//! Encodes client commands into RESP multi-bulk requests.

use super::resp_frame::{RespFrame, write_frame};
use bytes::{Bytes, BytesMut};

/// A single argument of a command, already coerced to its textual wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandArg(Bytes);

impl CommandArg {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for CommandArg {
    fn from(s: &str) -> Self {
        CommandArg(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for CommandArg {
    fn from(s: String) -> Self {
        CommandArg(Bytes::from(s))
    }
}

impl From<&String> for CommandArg {
    fn from(s: &String) -> Self {
        CommandArg::from(s.as_str())
    }
}

impl From<Bytes> for CommandArg {
    fn from(b: Bytes) -> Self {
        CommandArg(b)
    }
}

impl From<&[u8]> for CommandArg {
    fn from(b: &[u8]) -> Self {
        CommandArg(Bytes::copy_from_slice(b))
    }
}

impl From<Vec<u8>> for CommandArg {
    fn from(b: Vec<u8>) -> Self {
        CommandArg(Bytes::from(b))
    }
}

macro_rules! integer_arg {
    ($($t:ty),*) => {
        $(
            impl From<$t> for CommandArg {
                fn from(n: $t) -> Self {
                    CommandArg(Bytes::copy_from_slice(itoa::Buffer::new().format(n).as_bytes()))
                }
            }
        )*
    };
}

integer_arg!(i32, i64, u32, u64, usize);

impl From<f64> for CommandArg {
    fn from(n: f64) -> Self {
        CommandArg(Bytes::from(n.to_string()))
    }
}

/// A command name followed by its arguments.
///
/// Encoding is a pure function of the name and arguments: an array header
/// `*<1+N>\r\n` followed by one `$<len>\r\n<bytes>\r\n` bulk frame per element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    name: String,
    args: Vec<CommandArg>,
}

impl CommandFrame {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<CommandArg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends every argument of an iterator, in order.
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<CommandArg>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serializes the command to its wire bytes.
    pub fn encode(&self) -> Bytes {
        let frame = RespFrame::from(self.clone());
        let mut buf = BytesMut::new();
        write_frame(&frame, &mut buf);
        buf.freeze()
    }
}

impl From<CommandFrame> for RespFrame {
    fn from(cmd: CommandFrame) -> Self {
        let mut parts = Vec::with_capacity(cmd.args.len() + 1);
        parts.push(RespFrame::BulkString(Bytes::from(cmd.name)));
        parts.extend(cmd.args.into_iter().map(|a| RespFrame::BulkString(a.0)));
        RespFrame::Array(parts)
    }
}

/// Shorthand for encoding a command from a name and a slice of string arguments.
pub fn encode_command(name: &str, args: &[&str]) -> Bytes {
    CommandFrame::new(name).args(args.iter().copied()).encode()
}
