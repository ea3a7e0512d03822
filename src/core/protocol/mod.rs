// src/core/protocol/mod.rs

//! The wire protocol: length-prefixed frames, the payload abstraction and the
//! structured error reply sent back on recoverable failures.

pub mod error_reply;
pub mod frame;
pub mod payload;

pub use error_reply::{ERROR_REPLY_MSG_ID, ErrorCode, ErrorReply};
pub use frame::{DEFAULT_MAX_FRAME_SIZE, Frame, GameFrameCodec};
pub use payload::{Json, Payload};
