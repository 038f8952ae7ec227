//! Length-prefixed binary framing over TCP streams.
//!
//! # Wire Format
//!
//! ```text
//! ┌──────────────────┬──────────────────┬─────────────────────┐
//! │ u16 frame_length │ u16 message_type │ payload ...         │
//! └──────────────────┴──────────────────┴─────────────────────┘
//!                     ◄──────────── frame_length bytes ──────►
//! ```
//!
//! All integers are big-endian. `frame_length` counts the bytes that follow
//! it, so it is never smaller than 2.
//!
//! [`FrameDecoder`] is a pure reassembly buffer: feed it whatever the socket
//! delivered and pull out complete frames. The async helpers at the bottom
//! drive it against a tokio stream.

use anyhow::{anyhow, Context, Result};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the `frame_length` prefix.
pub const LENGTH_PREFIX_LEN: usize = 2;

/// Size of the `message_type` field.
pub const TYPE_LEN: usize = 2;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize - TYPE_LEN;

/// Bytes requested from the socket per read.
const READ_CHUNK: usize = 4096;

/// Framing-level errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// `frame_length` cannot even hold the message type.
    #[error("frame length {0} is shorter than the message type field")]
    TooShort(u16),

    /// Payload does not fit in a u16-length frame.
    #[error("payload of {0} bytes exceeds the 65533-byte frame limit")]
    TooLarge(usize),
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_type: u16,
    pub payload: Vec<u8>,
}

/// Serialize a frame.
pub fn encode_frame(message_type: u16, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FrameError::TooLarge(payload.len()));
    }
    let length = (TYPE_LEN + payload.len()) as u16;

    let mut out = Vec::with_capacity(LENGTH_PREFIX_LEN + length as usize);
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(&message_type.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Reassembles frames from arbitrarily split byte chunks.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes as received from the stream.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame, or `Ok(None)` if more bytes are needed.
    ///
    /// # Errors
    ///
    /// A `frame_length` below 2 is unrecoverable: the stream can no longer be
    /// resynchronised and the caller should drop the connection.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.buf.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }
        let length = u16::from_be_bytes([self.buf[0], self.buf[1]]);
        if (length as usize) < TYPE_LEN {
            return Err(FrameError::TooShort(length));
        }

        let total = LENGTH_PREFIX_LEN + length as usize;
        if self.buf.len() < total {
            return Ok(None);
        }

        let message_type = u16::from_be_bytes([self.buf[2], self.buf[3]]);
        let payload = self.buf[LENGTH_PREFIX_LEN + TYPE_LEN..total].to_vec();
        self.buf.drain(..total);

        Ok(Some(Frame {
            message_type,
            payload,
        }))
    }
}

/// Read the next complete frame, pulling from `reader` as needed.
///
/// Bytes beyond the returned frame stay buffered in `decoder` for the next call.
///
/// # Errors
///
/// Returns an error if:
/// - The stream is closed (EOF) before a complete frame arrived
/// - The frame header is invalid
/// - The underlying read fails
pub async fn read_frame<R>(reader: &mut R, decoder: &mut FrameDecoder) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        if let Some(frame) = decoder.next_frame().context("Invalid frame header")? {
            return Ok(frame);
        }

        let n = reader
            .read(&mut chunk)
            .await
            .context("Failed to read from stream")?;
        if n == 0 {
            return Err(anyhow!(
                "Connection closed by peer ({} bytes of a partial frame buffered)",
                decoder.buffered()
            ));
        }
        decoder.push(&chunk[..n]);
    }
}

/// Write an encoded frame and flush it.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(frame)
        .await
        .context("Failed to write frame")?;
    writer.flush().await.context("Failed to flush frame")?;
    Ok(())
}
