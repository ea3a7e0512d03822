// src/core/errors.rs

//! Defines the primary error types for the server.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, covering every failure that can cross a module boundary.
///
/// Decode-time errors (`FrameTooLarge`, `MalformedFrame`) are connection-level and close
/// the offending connection. Dispatch-time errors are answered with an error reply and
/// leave the connection open.
#[derive(Error, Debug)]
pub enum GateError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Frame too large: {declared} bytes exceeds the {max} byte limit")]
    FrameTooLarge { declared: usize, max: usize },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Unknown message id {0}")]
    UnknownMessageId(u16),

    #[error("Payload decode error for message id {msg_id}: {source}")]
    PayloadDecode {
        msg_id: u16,
        #[source]
        source: DecodeError,
    },

    #[error("Handler for message id {msg_id} failed: {reason}")]
    HandlerExecution { msg_id: u16, reason: String },

    #[error("Message id {msg_id} is already bound to '{existing}', cannot register '{incoming}'")]
    RegistrationConflict {
        msg_id: u16,
        existing: &'static str,
        incoming: &'static str,
    },

    #[error("Message id {0} is reserved")]
    ReservedMessageId(u16),

    #[error("Pool '{pool}' did not drain in time, {abandoned} task(s) abandoned")]
    ShutdownDrainTimeout { pool: String, abandoned: usize },

    #[error("Pool '{0}' is shut down and rejects new tasks")]
    PoolShutdown(String),

    #[error("Connection {0} is closed")]
    ConnectionClosed(u64),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
impl Clone for GateError {
    fn clone(&self) -> Self {
        match self {
            GateError::Io(e) => GateError::Io(Arc::clone(e)),
            GateError::FrameTooLarge { declared, max } => GateError::FrameTooLarge {
                declared: *declared,
                max: *max,
            },
            GateError::MalformedFrame(s) => GateError::MalformedFrame(s.clone()),
            GateError::UnknownMessageId(id) => GateError::UnknownMessageId(*id),
            GateError::PayloadDecode { msg_id, source } => GateError::PayloadDecode {
                msg_id: *msg_id,
                source: source.clone(),
            },
            GateError::HandlerExecution { msg_id, reason } => GateError::HandlerExecution {
                msg_id: *msg_id,
                reason: reason.clone(),
            },
            GateError::RegistrationConflict {
                msg_id,
                existing,
                incoming,
            } => GateError::RegistrationConflict {
                msg_id: *msg_id,
                existing,
                incoming,
            },
            GateError::ReservedMessageId(id) => GateError::ReservedMessageId(*id),
            GateError::ShutdownDrainTimeout { pool, abandoned } => {
                GateError::ShutdownDrainTimeout {
                    pool: pool.clone(),
                    abandoned: *abandoned,
                }
            }
            GateError::PoolShutdown(s) => GateError::PoolShutdown(s.clone()),
            GateError::ConnectionClosed(id) => GateError::ConnectionClosed(*id),
            GateError::WebSocket(s) => GateError::WebSocket(s.clone()),
            GateError::ProtocolViolation(s) => GateError::ProtocolViolation(s.clone()),
            GateError::InvalidConfig(s) => GateError::InvalidConfig(s.clone()),
            GateError::Internal(s) => GateError::Internal(s.clone()),
        }
    }
}

impl PartialEq for GateError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (GateError::Io(e1), GateError::Io(e2)) => e1.to_string() == e2.to_string(),
            (
                GateError::FrameTooLarge {
                    declared: d1,
                    max: m1,
                },
                GateError::FrameTooLarge {
                    declared: d2,
                    max: m2,
                },
            ) => d1 == d2 && m1 == m2,
            (GateError::MalformedFrame(s1), GateError::MalformedFrame(s2)) => s1 == s2,
            (GateError::UnknownMessageId(a), GateError::UnknownMessageId(b)) => a == b,
            (GateError::RegistrationConflict { msg_id: a, .. }, GateError::RegistrationConflict { msg_id: b, .. }) => {
                a == b
            }
            (GateError::ConnectionClosed(a), GateError::ConnectionClosed(b)) => a == b,
            (GateError::PoolShutdown(a), GateError::PoolShutdown(b)) => a == b,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

impl From<std::io::Error> for GateError {
    fn from(e: std::io::Error) -> Self {
        GateError::Io(Arc::new(e))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for GateError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match e {
            WsError::Io(io) => GateError::Io(Arc::new(io)),
            other => GateError::WebSocket(other.to_string()),
        }
    }
}

/// Failure to turn raw payload bytes into the payload type a handler expects.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("payload is empty")]
    Empty,

    #[error("payload truncated: needed {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid payload: {0}")]
    Invalid(String),
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        DecodeError::Invalid(e.to_string())
    }
}

impl From<std::str::Utf8Error> for DecodeError {
    fn from(_: std::str::Utf8Error) -> Self {
        DecodeError::InvalidUtf8
    }
}

/// An error raised by business logic while a handler runs on a worker pool.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("no player is bound to this connection")]
    NoSession,

    #[error("reply could not be delivered: {0}")]
    Delivery(#[from] GateError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
