//! TAK Protocol stream framing
//!
//! Every frame on a stream (or in a datagram) is laid out as:
//!
//! ```text
//! ┌────────┬──────────────────┬───────────────────────────┐
//! │  0xBF  │ varint length N  │ N bytes TakMessage payload │
//! └────────┴──────────────────┴───────────────────────────┘
//! ```
//!
//! The varint is little-endian base-128 with the continuation flag in the high bit.
//! Other marker values are reserved (plain-text CoT, future encodings) and rejected.

use crate::event::Event;
use crate::proto::{decode_payload, encode_payload, DecodeError, TakMessage};
use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

/// Marker byte selecting protobuf-framed CoT
pub const PROTOBUF_MARKER: u8 = 0xBF;

/// Default limit on a single frame payload (10MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// A 64-bit varint never needs more than 10 bytes
const MAX_VARINT_LEN: usize = 10;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Invalid marker byte 0x{0:02x}")]
    InvalidMarker(u8),

    #[error("Invalid varint length prefix")]
    InvalidVarint,

    #[error("Truncated frame: declared {declared} bytes, {available} available")]
    Truncated { declared: usize, available: usize },

    #[error("Frame too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: usize },

    #[error("Undecodable payload: {0}")]
    Decode(#[from] DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether the stream that produced this error must be closed.
    ///
    /// A bad payload inside a well-delimited frame only loses that message.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FrameError::Decode(_))
    }
}

/// Append a varint to a buffer
fn put_varint(dst: &mut BytesMut, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;

        if value != 0 {
            byte |= 0x80;
        }

        dst.put_u8(byte);

        if value == 0 {
            break;
        }
    }
}

/// Read a varint from the start of `data`.
///
/// Returns `Ok(None)` when `data` ends before the varint does.
fn read_varint(data: &[u8]) -> Result<Option<(u64, usize)>, FrameError> {
    let mut result: u64 = 0;

    for (i, byte) in data.iter().take(MAX_VARINT_LEN).enumerate() {
        result |= u64::from(byte & 0x7F) << (7 * i);

        if byte & 0x80 == 0 {
            return Ok(Some((result, i + 1)));
        }
    }

    if data.len() >= MAX_VARINT_LEN {
        Err(FrameError::InvalidVarint)
    } else {
        Ok(None)
    }
}

/// Encode an event as a complete frame
pub fn encode_frame(event: &Event) -> Vec<u8> {
    let payload = encode_payload(event);
    let mut buf = BytesMut::with_capacity(payload.len() + 1 + MAX_VARINT_LEN);
    buf.put_u8(PROTOBUF_MARKER);
    put_varint(&mut buf, payload.len() as u64);
    buf.put_slice(&payload);
    buf.to_vec()
}

/// Decode one frame from the start of `data`.
///
/// Returns the message and the number of bytes the frame occupied. Unlike the
/// streaming [`FrameCodec`], a short buffer is an error here.
pub fn decode_frame(data: &[u8]) -> Result<(TakMessage, usize), FrameError> {
    let (&marker, rest) = data.split_first().ok_or(FrameError::Truncated {
        declared: 1,
        available: 0,
    })?;
    if marker != PROTOBUF_MARKER {
        return Err(FrameError::InvalidMarker(marker));
    }

    // a length prefix cut off by the end of the buffer needs at least one more byte
    let (len, varint_len) = read_varint(rest)?.ok_or(FrameError::Truncated {
        declared: rest.len() + 1,
        available: rest.len(),
    })?;
    let available = rest.len() - varint_len;
    let declared = usize::try_from(len).map_err(|_| FrameError::TooLarge {
        size: len,
        max: usize::MAX,
    })?;
    if declared > available {
        return Err(FrameError::Truncated {
            declared,
            available,
        });
    }

    let payload = &rest[varint_len..varint_len + declared];
    let message = decode_payload(payload)?;
    Ok((message, 1 + varint_len + declared))
}

/// Streaming codec for TCP connections.
///
/// Partial frames stay buffered until the rest arrives. On a bad marker the
/// decoder drops bytes up to the next marker candidate before reporting the
/// error, so a caller that chooses to keep reading resumes at a frame boundary
/// when one exists.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = TakMessage;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(&marker) = src.first() else {
            return Ok(None);
        };

        if marker != PROTOBUF_MARKER {
            let skip = src
                .iter()
                .position(|b| *b == PROTOBUF_MARKER)
                .unwrap_or(src.len());
            warn!(marker, skipped = skip, "Discarding bytes before next frame marker");
            src.advance(skip);
            return Err(FrameError::InvalidMarker(marker));
        }

        let (len, varint_len) = match read_varint(&src[1..]) {
            Ok(Some(v)) => v,
            Ok(None) => return Ok(None),
            Err(e) => {
                src.advance(1);
                return Err(e);
            }
        };

        if len > self.max_frame_size as u64 {
            src.advance(1 + varint_len);
            return Err(FrameError::TooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }

        let header_len = 1 + varint_len;
        let frame_len = header_len + len as usize;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(header_len);
        let payload = src.split_to(len as usize);
        Ok(Some(decode_payload(&payload)?))
    }
}

impl Encoder<&Event> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, event: &Event, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = encode_payload(event);
        dst.reserve(payload.len() + 1 + MAX_VARINT_LEN);
        dst.put_u8(PROTOBUF_MARKER);
        put_varint(dst, payload.len() as u64);
        dst.put_slice(&payload);
        Ok(())
    }
}
