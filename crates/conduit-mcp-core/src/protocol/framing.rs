//! Frame codec for JSON-RPC messages over byte streams.
//!
//! Two framings are supported behind one codec:
//!
//! - **Newline-delimited** (default): one compact JSON document per line,
//!   terminated by `\n`. Embedded newlines are forbidden.
//! - **Length-prefixed**: `Content-Length: <n>\r\n[...headers...]\r\n\r\n`
//!   followed by exactly `n` payload bytes, as spoken by language-server
//!   style clients. A `Content-Type` header is accepted and ignored.
//!
//! [`FrameCodec::feed`] is an incremental decoder: bytes are appended to an
//! internal buffer and zero or more complete frames are drained in arrival
//! order, so any chunking of a valid stream yields the same message
//! sequence. The codec also implements `tokio_util::codec::{Decoder,
//! Encoder}` for use with `FramedRead`/`FramedWrite`.

use crate::protocol::jsonrpc::JsonRpcMessage;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Default cap on a single message, in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Wire framing selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// One compact JSON document per `\n`-terminated line.
    #[default]
    NewlineDelimited,
    /// `Content-Length`-prefixed frames with CRLF header blocks.
    ContentLength,
}

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("malformed frame header: {0}")]
    MalformedHeader(String),

    #[error("invalid Content-Length value: {0}")]
    InvalidLength(String),

    #[error("message of {size} bytes exceeds maximum of {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("embedded newline in newline-delimited frame")]
    EmbeddedNewline,

    #[error("invalid JSON in frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Incremental encoder/decoder for framed JSON-RPC messages.
#[derive(Debug)]
pub struct FrameCodec {
    framing: Framing,
    max_message_size: usize,
    buffer: BytesMut,
    /// Payload length parsed from headers, pending body bytes (length-prefixed mode).
    pending_len: Option<usize>,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(Framing::default(), DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl FrameCodec {
    pub fn new(framing: Framing, max_message_size: usize) -> Self {
        Self {
            framing,
            max_message_size,
            buffer: BytesMut::new(),
            pending_len: None,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Serialize one message with its framing envelope.
    pub fn encode_message(&self, message: &JsonRpcMessage) -> Result<Bytes, FramingError> {
        let payload = serde_json::to_vec(message)?;
        if payload.len() > self.max_message_size {
            return Err(FramingError::MessageTooLarge {
                size: payload.len(),
                max: self.max_message_size,
            });
        }
        match self.framing {
            Framing::NewlineDelimited => {
                if payload.contains(&b'\n') {
                    return Err(FramingError::EmbeddedNewline);
                }
                let mut out = BytesMut::with_capacity(payload.len() + 1);
                out.put_slice(&payload);
                out.put_u8(b'\n');
                Ok(out.freeze())
            }
            Framing::ContentLength => {
                let header = format!("Content-Length: {}\r\n\r\n", payload.len());
                let mut out = BytesMut::with_capacity(header.len() + payload.len());
                out.put_slice(header.as_bytes());
                out.put_slice(&payload);
                Ok(out.freeze())
            }
        }
    }

    /// Append bytes and drain every complete frame, in arrival order.
    ///
    /// Partial frames stay buffered. On a JSON error the offending frame has
    /// already been consumed, so the stream can continue with the next
    /// frame; framing-level errors (malformed headers, oversized frames)
    /// leave the buffer cleared for the same reason.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<JsonRpcMessage>, FramingError> {
        self.buffer.extend_from_slice(bytes);
        let mut messages = Vec::new();
        loop {
            match self.extract_frame() {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => break,
                Err(err) => {
                    if !matches!(err, FramingError::Json(_)) {
                        self.buffer.clear();
                        self.pending_len = None;
                    }
                    return Err(err);
                }
            }
        }
        Ok(messages)
    }

    /// Number of bytes currently buffered without a complete frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn extract_frame(&mut self) -> Result<Option<JsonRpcMessage>, FramingError> {
        match self.framing {
            Framing::NewlineDelimited => extract_line_frame(&mut self.buffer, self.max_message_size),
            Framing::ContentLength => extract_prefixed_frame(
                &mut self.buffer,
                &mut self.pending_len,
                self.max_message_size,
            ),
        }
    }
}

fn extract_line_frame(
    buffer: &mut BytesMut,
    max: usize,
) -> Result<Option<JsonRpcMessage>, FramingError> {
    loop {
        let Some(pos) = buffer.iter().position(|&b| b == b'\n') else {
            if buffer.len() > max {
                return Err(FramingError::MessageTooLarge {
                    size: buffer.len(),
                    max,
                });
            }
            return Ok(None);
        };
        if pos > max {
            return Err(FramingError::MessageTooLarge { size: pos, max });
        }
        let mut line = buffer.split_to(pos + 1);
        line.truncate(pos);
        // Tolerate CRLF peers.
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            continue;
        }
        return Ok(Some(serde_json::from_slice(&line)?));
    }
}

fn extract_prefixed_frame(
    buffer: &mut BytesMut,
    pending_len: &mut Option<usize>,
    max: usize,
) -> Result<Option<JsonRpcMessage>, FramingError> {
    let len = match *pending_len {
        Some(len) => len,
        None => {
            let Some(terminator) = find_subsequence(buffer, HEADER_TERMINATOR) else {
                if buffer.len() > max {
                    return Err(FramingError::MalformedHeader(
                        "header block exceeds maximum message size".to_string(),
                    ));
                }
                return Ok(None);
            };
            let header_block = buffer.split_to(terminator + HEADER_TERMINATOR.len());
            let len = parse_headers(&header_block[..terminator])?;
            if len > max {
                return Err(FramingError::MessageTooLarge { size: len, max });
            }
            *pending_len = Some(len);
            len
        }
    };

    if buffer.len() < len {
        return Ok(None);
    }
    *pending_len = None;
    let payload = buffer.split_to(len);
    Ok(Some(serde_json::from_slice(&payload)?))
}

fn parse_headers(block: &[u8]) -> Result<usize, FramingError> {
    let text = std::str::from_utf8(block)
        .map_err(|_| FramingError::MalformedHeader("header block is not UTF-8".to_string()))?;
    let mut content_length = None;
    for line in text.split("\r\n") {
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(FramingError::MalformedHeader(format!(
                "header line without separator: {line:?}"
            )));
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            let value = value.trim();
            let parsed = value
                .parse::<usize>()
                .map_err(|_| FramingError::InvalidLength(value.to_string()))?;
            content_length = Some(parsed);
        }
        // Other headers (Content-Type in particular) are tolerated.
    }
    content_length
        .ok_or_else(|| FramingError::MalformedHeader("missing Content-Length header".to_string()))
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

impl Decoder for FrameCodec {
    type Item = JsonRpcMessage;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.framing {
            Framing::NewlineDelimited => extract_line_frame(src, self.max_message_size),
            Framing::ContentLength => {
                extract_prefixed_frame(src, &mut self.pending_len, self.max_message_size)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let frame = self.decode(src)?;
        if frame.is_none() && !src.is_empty() {
            // Trailing bytes with no terminator: drop them at EOF.
            src.advance(src.len());
        }
        Ok(frame)
    }
}

impl Encoder<JsonRpcMessage> for FrameCodec {
    type Error = FramingError;

    fn encode(&mut self, item: JsonRpcMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = self.encode_message(&item)?;
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}
