//! Frames of transfer messages on a stream.
//!
//! ```text
//! <len u32><flags u8><payload>
//! ```
//!
//! `len` is the length of the payload alone. Bit 0 of `flags` is set when
//! the payload is zlib compressed, the other bits are reserved and ignored.
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use super::{messages::TransferMessage, WireCodec, MAX_BUFFER_SIZE};
use crate::error::Error;

/// Length of the frame header, `<len u32><flags u8>`.
pub const HEADER_LEN: usize = 5;

pub const FLAG_COMPRESSED: u8 = 0b0000_0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Length of the payload, without the header.
    pub len: usize,
    pub flags: u8,
}

impl FrameHeader {
    /// Parse the header at the start of `buf`.
    ///
    /// Returns `Ok(None)` if `buf` is shorter than [`HEADER_LEN`].
    pub fn parse(buf: &[u8], max_len: usize) -> Result<Option<Self>, Error> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if len > max_len {
            return Err(Error::FrameTooLarge(len, max_len));
        }

        Ok(Some(Self { len, flags: buf[4] }))
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }

    /// Length of the whole frame.
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.len
    }
}

/// Append a frame holding `payload` to `dst`.
pub fn put_frame(dst: &mut BytesMut, payload: &[u8], compressed: bool) {
    let flags = if compressed { FLAG_COMPRESSED } else { 0 };

    dst.reserve(HEADER_LEN + payload.len());
    dst.put_u32(payload.len() as u32);
    dst.put_u8(flags);
    dst.extend_from_slice(payload);
}

/// Codec of [`TransferMessage`] frames.
#[derive(Debug)]
pub struct TransferCodec {
    wire: WireCodec,
    /// Compress outgoing payloads.
    pub compress: bool,
    /// Pad outgoing payloads to a multiple of this, 0 disables padding.
    pub pad_to_block_size: usize,
    max_frame_len: usize,
}

impl Default for TransferCodec {
    fn default() -> Self {
        Self::new(false, 0)
    }
}

impl TransferCodec {
    pub fn new(compress: bool, pad_to_block_size: usize) -> Self {
        Self::with_wire(WireCodec::new(), compress, pad_to_block_size)
    }

    pub fn with_wire(
        wire: WireCodec,
        compress: bool,
        pad_to_block_size: usize,
    ) -> Self {
        Self {
            wire,
            compress,
            pad_to_block_size,
            max_frame_len: MAX_BUFFER_SIZE,
        }
    }

    /// Lower the largest accepted payload, it can't go above
    /// [`MAX_BUFFER_SIZE`].
    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len.min(MAX_BUFFER_SIZE);
        self
    }
}

impl Encoder<TransferMessage> for TransferCodec {
    type Error = Error;

    fn encode(
        &mut self,
        item: TransferMessage,
        dst: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        let payload =
            self.wire.encode(&item, self.compress, self.pad_to_block_size)?;

        if payload.len() > self.max_frame_len {
            return Err(Error::FrameTooLarge(payload.len(), self.max_frame_len));
        }

        put_frame(dst, &payload, self.compress);

        Ok(())
    }
}

impl Decoder for TransferCodec {
    type Item = TransferMessage;
    type Error = Error;

    fn decode(
        &mut self,
        buf: &mut BytesMut,
    ) -> Result<Option<Self::Item>, Self::Error> {
        let Some(header) = FrameHeader::parse(buf, self.max_frame_len)? else {
            return Ok(None);
        };

        // wait for the rest of the frame without moving the cursor
        if buf.len() < header.frame_len() {
            buf.reserve(header.frame_len() - buf.len());
            return Ok(None);
        }

        buf.advance(HEADER_LEN);
        let payload = buf.split_to(header.len);

        trace!("frame of {} bytes, flags {:#04b}", header.len, header.flags);

        self.wire.decode_exact(&payload, header.is_compressed()).map(Some)
    }
}
