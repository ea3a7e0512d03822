// src/core/protocol/payload.rs

//! The payload abstraction. Frame bodies are opaque bytes; each handler declares the
//! concrete type it expects and that type knows how to parse itself.

use crate::core::errors::DecodeError;
use crate::core::GateError;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// A value that can travel as a frame payload.
///
/// `decode` must be a pure function of the input bytes.
pub trait Payload: Sized + Send + 'static {
    fn decode(bytes: Bytes) -> Result<Self, DecodeError>;
    fn encode(&self) -> Result<Bytes, GateError>;
}

/// Raw passthrough.
impl Payload for Bytes {
    fn decode(bytes: Bytes) -> Result<Self, DecodeError> {
        Ok(bytes)
    }

    fn encode(&self) -> Result<Bytes, GateError> {
        Ok(self.clone())
    }
}

/// UTF-8 text payload.
impl Payload for String {
    fn decode(bytes: Bytes) -> Result<Self, DecodeError> {
        Ok(std::str::from_utf8(&bytes)?.to_owned())
    }

    fn encode(&self) -> Result<Bytes, GateError> {
        Ok(Bytes::copy_from_slice(self.as_bytes()))
    }
}

/// Messages without a body. Any bytes sent along are ignored.
impl Payload for () {
    fn decode(_bytes: Bytes) -> Result<Self, DecodeError> {
        Ok(())
    }

    fn encode(&self) -> Result<Bytes, GateError> {
        Ok(Bytes::new())
    }
}

/// A JSON-encoded payload body.
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T> Payload for Json<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn decode(bytes: Bytes) -> Result<Self, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        Ok(Json(serde_json::from_slice(&bytes)?))
    }

    fn encode(&self) -> Result<Bytes, GateError> {
        serde_json::to_vec(&self.0)
            .map(Bytes::from)
            .map_err(|e| GateError::Internal(format!("JSON payload encoding failed: {e}")))
    }
}
