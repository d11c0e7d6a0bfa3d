//! Message framing for the TCP wire protocol.
//!
//! Each message is a 2-byte little-endian length prefix followed by the
//! payload. Payload length is bounded to `[MIN_FRAME_SIZE, MAX_FRAME_SIZE]`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Smallest allowed payload.
pub const MIN_FRAME_SIZE: usize = 2;

/// Largest allowed payload, bounded by the u16 length prefix.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// Frame header size (2-byte length prefix).
pub const FRAME_HEADER_SIZE: usize = 2;

/// Codec for encoding/decoding length-prefixed frames.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a new frame codec.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with a custom max frame size (still capped at `MAX_FRAME_SIZE`).
    #[must_use]
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = if size > MAX_FRAME_SIZE {
            MAX_FRAME_SIZE
        } else {
            size
        };
        self
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need the full header
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        // Parse header without consuming
        let mut header = &buf[..FRAME_HEADER_SIZE];
        let payload_len = header.get_u16_le() as usize;

        if payload_len < MIN_FRAME_SIZE || payload_len > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "frame length {payload_len} outside [{MIN_FRAME_SIZE}, {}]",
                    self.max_frame_size
                ),
            ));
        }

        // Check if we have the full frame
        let frame_len = FRAME_HEADER_SIZE + payload_len;
        if buf.len() < frame_len {
            buf.reserve(frame_len - buf.len());
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        Ok(Some(buf.split_to(payload_len).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, data: Bytes, buf: &mut BytesMut) -> Result<(), Self::Error> {
        let payload_len = data.len();

        if payload_len < MIN_FRAME_SIZE || payload_len > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "frame length {payload_len} outside [{MIN_FRAME_SIZE}, {}]",
                    self.max_frame_size
                ),
            ));
        }

        buf.reserve(FRAME_HEADER_SIZE + payload_len);
        #[allow(clippy::cast_possible_truncation)]
        buf.put_u16_le(payload_len as u16);
        buf.put(data);

        Ok(())
    }
}
