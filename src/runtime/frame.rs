//! Wire framing for msgframe messages.
//!
//! Every message on the wire is a frame:
//!
//! ```text
//! +------------------+------------------+------------------------+
//! | message_type i32 | body_len i32     | body (body_len bytes)  |
//! +------------------+------------------+------------------------+
//!   little-endian      little-endian
//! ```
//!
//! Receivers reject any `body_len` outside `(0, MAX_BODY]` as soon as the
//! header is available, before a single body byte is read.
//!
//! Two reading styles are provided:
//! - `read_header` / `read_body` for blocking (or awaited) streams
//! - `FrameDecoder` for readiness-driven loops that see partial data

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{self, Read};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Size of the fixed frame header.
pub const HEADER_LEN: usize = 8;

/// Largest body a receiver accepts.
pub const MAX_BODY: usize = 40960;

/// Upper bound on a single body read.
pub const READ_CHUNK: usize = 1024;

/// Framing errors.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Fewer than `HEADER_LEN` bytes were available for the header.
    #[error("malformed header: got {len} of 8 bytes")]
    MalformedHeader { len: usize },
    /// Header declared a body length outside `(0, MAX_BODY]`.
    #[error("invalid body length: {0}")]
    InvalidLength(i32),
    /// Stream ended before the whole body arrived.
    #[error("truncated body: got {} of {expected} bytes", .partial.len())]
    TruncatedBody { expected: usize, partial: Vec<u8> },
    /// Body too long for the 32-bit length field.
    #[error("body of {0} bytes does not fit the length field")]
    BodyTooLarge(usize),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_type: i32,
    pub body_len: i32,
}

impl FrameHeader {
    /// Check the declared length against `(0, MAX_BODY]`.
    ///
    /// Returns the length as `usize` when it is acceptable.
    pub fn validate(&self) -> Result<usize, FrameError> {
        match usize::try_from(self.body_len) {
            Ok(len) if len > 0 && len <= MAX_BODY => Ok(len),
            _ => Err(FrameError::InvalidLength(self.body_len)),
        }
    }
}

/// A complete frame: header fields plus exactly `body_len` body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_type: i32,
    pub body: Bytes,
}

/// Decode the 8-byte header. Extra bytes past the header are ignored.
pub fn decode_header(bytes: &[u8]) -> Result<FrameHeader, FrameError> {
    if bytes.len() < HEADER_LEN {
        return Err(FrameError::MalformedHeader { len: bytes.len() });
    }
    let mut buf = &bytes[..HEADER_LEN];
    Ok(FrameHeader {
        message_type: buf.get_i32_le(),
        body_len: buf.get_i32_le(),
    })
}

/// Encode a frame. The body length is not bounded on the sending side.
pub fn encode_frame(message_type: i32, body: &[u8]) -> Result<BytesMut, FrameError> {
    let mut out = BytesMut::with_capacity(HEADER_LEN + body.len());
    encode_frame_into(message_type, body, &mut out)?;
    Ok(out)
}

/// Append an encoded frame to `out`. Nothing is written on error.
pub fn encode_frame_into(
    message_type: i32,
    body: &[u8],
    out: &mut BytesMut,
) -> Result<(), FrameError> {
    let body_len = length_field(body.len())?;
    out.reserve(HEADER_LEN + body.len());
    out.put_i32_le(message_type);
    out.put_i32_le(body_len);
    out.put_slice(body);
    Ok(())
}

fn length_field(len: usize) -> Result<i32, FrameError> {
    i32::try_from(len).map_err(|_| FrameError::BodyTooLarge(len))
}

/// Read and decode a header from a blocking stream.
///
/// Returns `Ok(None)` if the stream is at end-of-stream before any header
/// byte arrived (the peer closed cleanly).
pub fn read_header<R: Read>(reader: &mut R) -> Result<Option<FrameHeader>, FrameError> {
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        match reader.read(&mut header[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    if filled == 0 {
        return Ok(None);
    }
    decode_header(&header[..filled]).map(Some)
}

/// Read exactly `body_len` bytes in chunks of at most `READ_CHUNK`.
///
/// On end-of-stream the bytes obtained so far are returned inside
/// `FrameError::TruncatedBody`.
pub fn read_body<R: Read>(reader: &mut R, body_len: usize) -> Result<Vec<u8>, FrameError> {
    let mut body = Vec::with_capacity(body_len);
    let mut chunk = [0u8; READ_CHUNK];
    while body.len() < body_len {
        let want = (body_len - body.len()).min(READ_CHUNK);
        match reader.read(&mut chunk[..want]) {
            Ok(0) => {
                return Err(FrameError::TruncatedBody {
                    expected: body_len,
                    partial: body,
                })
            }
            Ok(n) => body.extend_from_slice(&chunk[..n]),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(body)
}

/// Async counterpart of `read_header`.
pub async fn read_header_async<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<FrameHeader>, FrameError> {
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    if filled == 0 {
        return Ok(None);
    }
    decode_header(&header[..filled]).map(Some)
}

/// Async counterpart of `read_body`.
pub async fn read_body_async<R: AsyncRead + Unpin>(
    reader: &mut R,
    body_len: usize,
) -> Result<Vec<u8>, FrameError> {
    let mut body = Vec::with_capacity(body_len);
    let mut chunk = [0u8; READ_CHUNK];
    while body.len() < body_len {
        let want = (body_len - body.len()).min(READ_CHUNK);
        let n = reader.read(&mut chunk[..want]).await?;
        if n == 0 {
            return Err(FrameError::TruncatedBody {
                expected: body_len,
                partial: body,
            });
        }
        body.extend_from_slice(&chunk[..n]);
    }
    Ok(body)
}

/// Incremental frame decoder for non-blocking connections.
///
/// Bytes are appended as they arrive; `next_frame` yields frames only once
/// they are complete. The header is validated as soon as it is buffered so
/// a hostile length never causes body bytes to accumulate.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
    header: Option<(i32, usize)>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(HEADER_LEN + READ_CHUNK),
            header: None,
        }
    }

    /// Append freshly read bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes buffered but not yet returned as part of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame, if any.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let (message_type, body_len) = match self.header {
            Some(header) => header,
            None => {
                if self.buf.len() < HEADER_LEN {
                    return Ok(None);
                }
                let header = decode_header(&self.buf)?;
                let body_len = header.validate()?;
                self.buf.advance(HEADER_LEN);
                self.header = Some((header.message_type, body_len));
                (header.message_type, body_len)
            }
        };

        if self.buf.len() < body_len {
            return Ok(None);
        }

        self.header = None;
        Ok(Some(Frame {
            message_type,
            body: self.buf.split_to(body_len).freeze(),
        }))
    }

    /// Classify leftover bytes once the peer has closed its side.
    ///
    /// An empty buffer is a clean close; anything else is a frame cut short.
    pub fn finish(&mut self) -> Result<(), FrameError> {
        match self.header.take() {
            Some((_, body_len)) => Err(FrameError::TruncatedBody {
                expected: body_len,
                partial: self.buf.split().to_vec(),
            }),
            None if self.buf.is_empty() => Ok(()),
            None => Err(FrameError::MalformedHeader {
                len: self.buf.len(),
            }),
        }
    }
}
