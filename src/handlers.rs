// src/handlers.rs

//! Handlers the server registers on its own, before any game handlers.

use crate::core::GateError;
use crate::core::handler::HandlerRegistryBuilder;
use crate::core::heartbeat::{HEARTBEAT_REQ_MSG_ID, HeartbeatHandler, HeartbeatTracker};
use std::sync::Arc;

/// Registers the built-in handlers. Fails if game code already claimed one of their ids.
pub fn register_builtin(
    builder: &mut HandlerRegistryBuilder,
    heartbeat: Arc<HeartbeatTracker>,
) -> Result<(), GateError> {
    builder.register(HEARTBEAT_REQ_MSG_ID, HeartbeatHandler::new(heartbeat))?;
    Ok(())
}
