//! Newline-delimited codec for RFCOMM framing
//!
//! All messages are framed as:
//! ```text
//! [ N bytes: payload ][ 0x0A ]
//! ```
//!
//! A trailing `\r` before the newline is stripped on decode, and payload
//! bytes are interpreted as UTF-8 (invalid sequences are replaced).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Default maximum frame size (64 KiB, excluding the terminator)
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

const NEWLINE: u8 = b'\n';

/// Errors that can occur during decoding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Frame too long: {len} bytes (max: {max})")]
    FrameTooLong { len: usize, max: usize },
}

/// Encode a payload as one newline-terminated frame
pub fn encode(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 1);
    encode_into(payload, &mut buf);
    buf.freeze()
}

/// Encode a payload directly into a provided buffer
pub fn encode_into(payload: &[u8], buf: &mut BytesMut) {
    buf.reserve(payload.len() + 1);
    buf.put_slice(payload);
    buf.put_u8(NEWLINE);
}

/// Try to decode one line from a buffer
///
/// Returns:
/// - `Ok(Some(line))` if a complete line was decoded (terminator consumed)
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if the pending line exceeds `max_len`
pub fn decode(buf: &mut BytesMut, max_len: usize) -> Result<Option<String>, CodecError> {
    let Some(pos) = buf.iter().position(|&b| b == NEWLINE) else {
        // A pending `\r` may still turn out to be part of the terminator
        let len = payload_len(buf);
        if len > max_len {
            return Err(CodecError::FrameTooLong { len, max: max_len });
        }
        return Ok(None);
    };

    let len = payload_len(&buf[..pos]);
    if len > max_len {
        return Err(CodecError::FrameTooLong { len, max: max_len });
    }

    let line = buf.split_to(pos);
    buf.advance(1);

    Ok(Some(line_to_string(&line)))
}

/// Length of a line once a trailing `\r` is stripped
fn payload_len(line: &[u8]) -> usize {
    line.strip_suffix(b"\r").unwrap_or(line).len()
}

fn line_to_string(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

/// Decoder state machine for streaming line decoding
#[derive(Debug)]
pub struct LineDecoder {
    /// Partial line data being accumulated
    buffer: BytesMut,
    max_frame_len: usize,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    /// Create a new line decoder with the default frame limit
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Create a new line decoder with a custom frame limit
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_frame_len,
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next line from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete lines
    pub fn decode_next(&mut self) -> Result<Option<String>, CodecError> {
        decode(&mut self.buffer, self.max_frame_len)
    }

    /// Take whatever unterminated data remains once the stream has ended
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = self.buffer.split();
        Some(line_to_string(&rest))
    }

    /// Get the current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}
