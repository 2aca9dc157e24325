// src/core/protocol/resp_frame.rs

//! Implements the RESP frame structure and the corresponding `Encoder` and `Decoder`.
//!
//! The decoder is length-aware: it buffers across reads, so a frame split over several
//! chunks or several frames packed into one chunk decode the same way.

use crate::core::GateError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// The CRLF (Carriage Return, Line Feed) sequence used to terminate lines in RESP.
const CRLF: &[u8] = b"\r\n";
const CRLF_LEN: usize = 2;

// Protocol-level limits to prevent denial-of-service attacks.
const MAX_FRAME_ELEMENTS: usize = 1_024 * 1_024; // Max elements in an array or map.
const MAX_BULK_STRING_SIZE: usize = 512 * 1024 * 1024; // 512MB max bulk string size.
const MAX_RECURSION_DEPTH: usize = 256; // Limit recursion to prevent stack overflow.

/// An enum representing a single frame in the RESP protocol (RESP2 plus the RESP3
/// types a `HELLO 3` reply can carry).
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    NullArray,
    Array(Vec<RespFrame>),
    /// RESP3 map (`%`), kept as ordered key/value pairs.
    Map(Vec<(RespFrame, RespFrame)>),
    /// RESP3 boolean (`#t` / `#f`).
    Boolean(bool),
}

impl RespFrame {
    /// A convenience method to encode a frame into a `Bytes` buffer.
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        write_frame(self, &mut buf);
        buf.freeze()
    }

    /// Returns the textual payload of a string-like frame.
    pub fn as_text(&self) -> Option<String> {
        match self {
            RespFrame::SimpleString(s) | RespFrame::Error(s) => Some(s.clone()),
            RespFrame::BulkString(b) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }
}

/// Appends the wire form of `frame` to `dst`.
pub(crate) fn write_frame(frame: &RespFrame, dst: &mut BytesMut) {
    let mut num = itoa::Buffer::new();
    match frame {
        RespFrame::SimpleString(s) => {
            dst.extend_from_slice(b"+");
            dst.extend_from_slice(s.as_bytes());
            dst.extend_from_slice(CRLF);
        }
        RespFrame::Error(s) => {
            dst.extend_from_slice(b"-");
            dst.extend_from_slice(s.as_bytes());
            dst.extend_from_slice(CRLF);
        }
        RespFrame::Integer(i) => {
            dst.extend_from_slice(b":");
            dst.extend_from_slice(num.format(*i).as_bytes());
            dst.extend_from_slice(CRLF);
        }
        RespFrame::BulkString(b) => {
            dst.extend_from_slice(b"$");
            dst.extend_from_slice(num.format(b.len()).as_bytes());
            dst.extend_from_slice(CRLF);
            dst.extend_from_slice(b);
            dst.extend_from_slice(CRLF);
        }
        RespFrame::Null => dst.extend_from_slice(b"$-1\r\n"),
        RespFrame::NullArray => dst.extend_from_slice(b"*-1\r\n"),
        RespFrame::Array(arr) => {
            dst.extend_from_slice(b"*");
            dst.extend_from_slice(num.format(arr.len()).as_bytes());
            dst.extend_from_slice(CRLF);
            for frame in arr {
                write_frame(frame, dst);
            }
        }
        RespFrame::Map(pairs) => {
            dst.extend_from_slice(b"%");
            dst.extend_from_slice(num.format(pairs.len()).as_bytes());
            dst.extend_from_slice(CRLF);
            for (key, value) in pairs {
                write_frame(key, dst);
                write_frame(value, dst);
            }
        }
        RespFrame::Boolean(b) => {
            dst.extend_from_slice(if *b { b"#t\r\n" } else { b"#f\r\n" });
        }
    }
}

/// A `tokio_util::codec` implementation for encoding and decoding `RespFrame`s.
#[derive(Debug, Default, Clone, Copy)]
pub struct RespFrameCodec;

impl Encoder<RespFrame> for RespFrameCodec {
    type Error = GateError;

    fn encode(&mut self, item: RespFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        write_frame(&item, dst);
        Ok(())
    }
}

impl Decoder for RespFrameCodec {
    type Item = RespFrame;
    type Error = GateError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.decode_raw(src)?.map(|(frame, _)| frame))
    }
}

impl RespFrameCodec {
    /// Decodes one complete frame from the front of `src`, returning it together with
    /// the exact bytes it occupied. Returns `Ok(None)` and leaves `src` untouched when
    /// the buffer does not yet hold a complete frame.
    pub fn decode_raw(&mut self, src: &mut BytesMut) -> Result<Option<(RespFrame, Bytes)>, GateError> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut bytes = &src[..];
        match self.decode_recursive(&mut bytes, 0) {
            Ok(frame) => {
                let len = src.len() - bytes.len();
                let raw = src.split_to(len).freeze();
                Ok(Some((frame, raw)))
            }
            Err(GateError::IncompleteData) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// A recursive helper to decode a `RespFrame`. `bytes` is advanced as it's parsed.
    fn decode_recursive(&self, bytes: &mut &[u8], depth: usize) -> Result<RespFrame, GateError> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(GateError::InvalidFrame(
                "RESP recursion depth limit exceeded".to_string(),
            ));
        }

        if bytes.is_empty() {
            return Err(GateError::IncompleteData);
        }

        match bytes[0] {
            b'+' => Ok(RespFrame::SimpleString(self.parse_text_line(bytes)?)),
            b'-' => Ok(RespFrame::Error(self.parse_text_line(bytes)?)),
            b':' => self.parse_integer(bytes),
            b'$' => self.parse_bulk_string(bytes),
            b'*' => self.parse_array(bytes, depth),
            b'%' => self.parse_map(bytes, depth),
            b'#' => self.parse_boolean(bytes),
            b'_' => {
                *bytes = &bytes[1..];
                let line = self.parse_line(bytes)?;
                if !line.is_empty() {
                    return Err(GateError::InvalidFrame("malformed RESP3 null".into()));
                }
                Ok(RespFrame::Null)
            }
            other => Err(GateError::InvalidFrame(format!(
                "unexpected type marker {:?}",
                other as char
            ))),
        }
    }

    /// Finds the next CRLF and returns the line, advancing past it.
    fn parse_line<'a>(&self, bytes: &mut &'a [u8]) -> Result<&'a [u8], GateError> {
        if let Some(pos) = find_crlf(bytes) {
            let line = &bytes[..pos];
            *bytes = &bytes[pos + CRLF_LEN..];
            Ok(line)
        } else {
            Err(GateError::IncompleteData)
        }
    }

    /// Parses the line after a one-byte prefix as text (simple strings and errors).
    fn parse_text_line(&self, bytes: &mut &[u8]) -> Result<String, GateError> {
        *bytes = &bytes[1..];
        let line = self.parse_line(bytes)?;
        Ok(String::from_utf8_lossy(line).to_string())
    }

    /// Parses the line after a one-byte prefix as a signed length or integer.
    fn parse_number(&self, bytes: &mut &[u8]) -> Result<i64, GateError> {
        *bytes = &bytes[1..];
        let line = self.parse_line(bytes)?;
        let s = String::from_utf8_lossy(line);
        s.parse::<i64>()
            .map_err(|_| GateError::InvalidFrame(format!("invalid number {s:?}")))
    }

    fn parse_integer(&self, bytes: &mut &[u8]) -> Result<RespFrame, GateError> {
        Ok(RespFrame::Integer(self.parse_number(bytes)?))
    }

    fn parse_boolean(&self, bytes: &mut &[u8]) -> Result<RespFrame, GateError> {
        *bytes = &bytes[1..];
        match self.parse_line(bytes)? {
            b"t" => Ok(RespFrame::Boolean(true)),
            b"f" => Ok(RespFrame::Boolean(false)),
            _ => Err(GateError::InvalidFrame("malformed RESP3 boolean".into())),
        }
    }

    /// Parses a Bulk String (e.g., `$5\r\nhello\r\n`).
    fn parse_bulk_string(&self, bytes: &mut &[u8]) -> Result<RespFrame, GateError> {
        let str_len = self.parse_number(bytes)?;

        if str_len == -1 {
            return Ok(RespFrame::Null);
        }

        let str_len = usize::try_from(str_len)
            .map_err(|_| GateError::InvalidFrame("negative bulk length".into()))?;
        if str_len > MAX_BULK_STRING_SIZE {
            return Err(GateError::InvalidFrame("bulk string too large".into()));
        }

        if bytes.len() < str_len + CRLF_LEN {
            return Err(GateError::IncompleteData);
        }

        if &bytes[str_len..str_len + CRLF_LEN] != CRLF {
            return Err(GateError::InvalidFrame(
                "bulk string not terminated by CRLF".into(),
            ));
        }

        let data = Bytes::copy_from_slice(&bytes[..str_len]);
        bytes.advance(str_len + CRLF_LEN);
        Ok(RespFrame::BulkString(data))
    }

    /// Reads an aggregate header and validates the element count.
    fn parse_aggregate_len(&self, bytes: &mut &[u8]) -> Result<Option<usize>, GateError> {
        let len = self.parse_number(bytes)?;
        if len == -1 {
            return Ok(None);
        }
        let len = usize::try_from(len)
            .map_err(|_| GateError::InvalidFrame("negative aggregate length".into()))?;
        if len > MAX_FRAME_ELEMENTS {
            return Err(GateError::InvalidFrame("too many aggregate elements".into()));
        }
        Ok(Some(len))
    }

    /// Parses an Array (e.g., `*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n`).
    fn parse_array(&self, bytes: &mut &[u8], depth: usize) -> Result<RespFrame, GateError> {
        let Some(arr_len) = self.parse_aggregate_len(bytes)? else {
            return Ok(RespFrame::NullArray);
        };

        let mut frames = Vec::with_capacity(arr_len.min(1024));
        for _ in 0..arr_len {
            frames.push(self.decode_recursive(bytes, depth + 1)?);
        }
        Ok(RespFrame::Array(frames))
    }

    /// Parses a RESP3 Map (e.g., `%1\r\n+proto\r\n:3\r\n`).
    fn parse_map(&self, bytes: &mut &[u8], depth: usize) -> Result<RespFrame, GateError> {
        let Some(map_len) = self.parse_aggregate_len(bytes)? else {
            return Err(GateError::InvalidFrame("null map".into()));
        };

        let mut pairs = Vec::with_capacity(map_len.min(1024));
        for _ in 0..map_len {
            let key = self.decode_recursive(bytes, depth + 1)?;
            let value = self.decode_recursive(bytes, depth + 1)?;
            pairs.push((key, value));
        }
        Ok(RespFrame::Map(pairs))
    }
}

/// Helper function to find the next CRLF sequence in a buffer.
fn find_crlf(src: &[u8]) -> Option<usize> {
    src.windows(CRLF_LEN).position(|window| window == CRLF)
}
