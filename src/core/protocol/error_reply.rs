// src/core/protocol/error_reply.rs

//! The error reply payload sent back on message id `0` when a frame cannot be served.
//!
//! Layout (big-endian): `code:i32 | msg_len:u16 | msg | details_len:u16 | details`.

use super::payload::Payload;
use crate::core::GateError;
use crate::core::errors::DecodeError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use strum_macros::{Display, EnumIter};

/// Message id reserved for error replies. Handlers may not register it.
pub const ERROR_REPLY_MSG_ID: u16 = 0;

/// Upper bound for each text field of an error reply.
const MAX_TEXT_LEN: usize = u16::MAX as usize;

/// Error codes carried in an `ErrorReply`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[repr(i32)]
pub enum ErrorCode {
    #[strum(serialize = "UNKNOWN_MESSAGE")]
    UnknownMessage = 1,
    #[strum(serialize = "PAYLOAD_DECODE")]
    PayloadDecode = 2,
    #[strum(serialize = "INTERNAL_ERROR")]
    InternalError = 3,
    #[strum(serialize = "SHUTTING_DOWN")]
    ShuttingDown = 4,
    #[strum(serialize = "NO_SESSION")]
    NoSession = 5,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::UnknownMessage),
            2 => Some(Self::PayloadDecode),
            3 => Some(Self::InternalError),
            4 => Some(Self::ShuttingDown),
            5 => Some(Self::NoSession),
            _ => None,
        }
    }
}

/// A decoded error reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReply {
    pub code: i32,
    pub message: String,
    pub details: String,
}

impl ErrorReply {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_i32(),
            message: message.into(),
            details: String::new(),
        }
    }

    /// The known code, if the peer sent one this server understands.
    pub fn error_code(&self) -> Option<ErrorCode> {
        ErrorCode::from_i32(self.code)
    }

    /// Encodes the reply. Overlong text is cut at a character boundary.
    pub fn to_bytes(&self) -> Bytes {
        let message = truncate_utf8(&self.message, MAX_TEXT_LEN);
        let details = truncate_utf8(&self.details, MAX_TEXT_LEN);
        let mut buf = BytesMut::with_capacity(4 + 2 + message.len() + 2 + details.len());
        buf.put_i32(self.code);
        buf.put_u16(message.len() as u16);
        buf.put_slice(message.as_bytes());
        buf.put_u16(details.len() as u16);
        buf.put_slice(details.as_bytes());
        buf.freeze()
    }
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn read_text(buf: &mut Bytes) -> Result<String, DecodeError> {
    if buf.remaining() < 2 {
        return Err(DecodeError::Truncated {
            needed: 2,
            got: buf.remaining(),
        });
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(DecodeError::Truncated {
            needed: len,
            got: buf.remaining(),
        });
    }
    let raw = buf.split_to(len);
    Ok(std::str::from_utf8(&raw)?.to_owned())
}

impl Payload for ErrorReply {
    fn decode(mut bytes: Bytes) -> Result<Self, DecodeError> {
        if bytes.remaining() < 4 {
            return Err(DecodeError::Truncated {
                needed: 4,
                got: bytes.remaining(),
            });
        }
        let code = bytes.get_i32();
        let message = read_text(&mut bytes)?;
        let details = read_text(&mut bytes)?;
        Ok(Self {
            code,
            message,
            details,
        })
    }

    fn encode(&self) -> Result<Bytes, GateError> {
        Ok(self.to_bytes())
    }
}
