//! Message framing for the length-prefixed stream protocol
//!
//! A frame is a 4-byte big-endian payload length followed by that many bytes
//! of opaque payload. Reads may deliver partial headers, partial payloads, or
//! several frames at once; `FrameDecoder` buffers across reads and yields
//! complete payloads in order.

use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::game::constants::net::MAX_FRAME_SIZE;

/// Length prefix size in bytes
const HEADER_LEN: usize = 4;

/// Errors that can occur during message framing
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Frame too large: {0} bytes (max {1})")]
    FrameTooLarge(usize, usize),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Streaming decoder holding the per-connection receive buffer
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_size: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(HEADER_LEN + 256),
            max_frame_size,
        }
    }

    /// Append freshly received bytes to the buffer
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Extract the next complete frame payload, if one is buffered.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A declared length above
    /// the maximum is a fatal frame error: the caller must close the
    /// connection, the decoder state is no longer usable.
    pub fn try_extract(&mut self) -> Result<Option<Vec<u8>>, FramingError> {
        if self.buffer.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]) as usize;

        if len > self.max_frame_size {
            return Err(FramingError::FrameTooLarge(len, self.max_frame_size));
        }

        if self.buffer.len() < HEADER_LEN + len {
            return Ok(None);
        }

        let payload = self.buffer[HEADER_LEN..HEADER_LEN + len].to_vec();
        self.buffer.drain(..HEADER_LEN + len);
        Ok(Some(payload))
    }

    /// Bytes currently buffered (header bytes included)
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a payload into a framed byte vector
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FramingError> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(FramingError::FrameTooLarge(payload.len(), MAX_FRAME_SIZE));
    }
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Write a framed payload to a stream
///
/// `write_all` loops over partial sends; would-block is absorbed by the
/// runtime's poll-then-send discipline.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    stream: &mut W,
    payload: &[u8],
) -> Result<(), FramingError> {
    let frame = encode_frame(payload)?;
    stream.write_all(&frame).await?;
    stream.flush().await?;
    Ok(())
}
