// src/core/mod.rs

//! The central module containing the protocol, dispatch, concurrency and session
//! machinery of the game server core.

pub mod errors;
pub mod handler;
pub mod heartbeat;
pub mod id_generator;
pub mod metrics;
pub mod persistence;
pub mod pool;
pub mod protocol;
pub mod session;
pub mod shutdown;
pub mod tasks;

pub use errors::{DecodeError, GateError, HandlerError};
pub use protocol::Frame;
