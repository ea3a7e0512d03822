// src/core/protocol/frame.rs

//! Implements the game frame structure and the corresponding `Encoder` and `Decoder`.
//!
//! Wire layout (big-endian):
//!
//! ```text
//! +------------+------------+--------------+-----------------+
//! | length u32 | msg_id u16 | sequence i32 | payload (bytes) |
//! +------------+------------+--------------+-----------------+
//! ```
//!
//! `length` counts everything after itself, so `length == 6 + payload.len()`.

use crate::core::GateError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Size of the leading length field.
pub const LENGTH_FIELD_LEN: usize = 4;
/// Bytes covered by `length` that are not payload: `msg_id` (2) + `sequence` (4).
pub const FRAME_OVERHEAD: usize = 6;
/// Default upper bound for the `length` field (1 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// One complete protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Selects the handler that processes this frame.
    pub msg_id: u16,
    /// Caller-supplied correlation number, echoed back in replies.
    pub sequence: i32,
    /// Opaque payload body.
    pub payload: Bytes,
}

impl Frame {
    pub fn new(msg_id: u16, sequence: i32, payload: impl Into<Bytes>) -> Self {
        Self {
            msg_id,
            sequence,
            payload: payload.into(),
        }
    }

    /// The value of the `length` field for this frame.
    pub fn wire_length(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }

    /// Encodes the frame into a standalone byte vector.
    pub fn encode_to_vec(&self, max_frame_size: usize) -> Result<Vec<u8>, GateError> {
        let mut buf = BytesMut::with_capacity(LENGTH_FIELD_LEN + self.wire_length());
        GameFrameCodec::new(max_frame_size).encode(self.clone(), &mut buf)?;
        Ok(buf.to_vec())
    }
}

/// A `tokio_util::codec` implementation for encoding and decoding `Frame`s.
///
/// Handles stream segmentation: a frame is only produced once all `length` bytes are
/// buffered; partial input stays in the buffer for the next read.
#[derive(Debug, Clone, Copy)]
pub struct GameFrameCodec {
    max_frame_size: usize,
}

impl Default for GameFrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl GameFrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn check_length(&self, declared: usize) -> Result<(), GateError> {
        if declared < FRAME_OVERHEAD {
            return Err(GateError::MalformedFrame(format!(
                "declared length {declared} is shorter than the {FRAME_OVERHEAD} byte header"
            )));
        }
        if declared > self.max_frame_size {
            return Err(GateError::FrameTooLarge {
                declared,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }
}

impl Encoder<Frame> for GameFrameCodec {
    type Error = GateError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let declared = item.wire_length();
        self.check_length(declared)?;

        dst.reserve(LENGTH_FIELD_LEN + declared);
        dst.put_u32(declared as u32);
        dst.put_u16(item.msg_id);
        dst.put_i32(item.sequence);
        dst.extend_from_slice(&item.payload);
        Ok(())
    }
}

impl Decoder for GameFrameCodec {
    type Item = Frame;
    type Error = GateError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_FIELD_LEN {
            return Ok(None);
        }

        let mut length_bytes = [0u8; LENGTH_FIELD_LEN];
        length_bytes.copy_from_slice(&src[..LENGTH_FIELD_LEN]);
        let declared = u32::from_be_bytes(length_bytes) as usize;

        // Reject before reserving anything for the body.
        self.check_length(declared)?;

        let total = LENGTH_FIELD_LEN + declared;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_LEN);
        let msg_id = src.get_u16();
        let sequence = src.get_i32();
        let payload = src.split_to(declared - FRAME_OVERHEAD).freeze();

        Ok(Some(Frame {
            msg_id,
            sequence,
            payload,
        }))
    }
}
