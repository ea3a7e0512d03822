// src/core/session/sender.rs

use super::SessionRegistry;
use crate::connection::ConnectionHandle;
use crate::core::GateError;
use crate::core::protocol::{ERROR_REPLY_MSG_ID, ErrorCode, ErrorReply};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// Pushes frames to players and connections. Thread-safe and cheap to clone.
#[derive(Clone)]
pub struct ResponseSender {
    sessions: Arc<SessionRegistry>,
}

impl ResponseSender {
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self { sessions }
    }

    /// Sends to the connection `player_id` is bound to.
    ///
    /// Returns false, with a warning, when the player is offline or the frame could not
    /// be queued.
    pub fn send_to_player(
        &self,
        player_id: i64,
        msg_id: u16,
        sequence: i32,
        payload: impl Into<Bytes>,
    ) -> bool {
        let Some(connection) = self.sessions.get(player_id) else {
            warn!(player_id, msg_id, "Cannot send to player: not online.");
            return false;
        };
        match connection.send_frame(msg_id, sequence, payload) {
            Ok(()) => true,
            Err(e) => {
                warn!(player_id, msg_id, conn = connection.id(), "Send to player failed: {e}");
                false
            }
        }
    }

    /// Sends on a specific connection, bound or not.
    pub fn send_on_connection(
        &self,
        connection: &ConnectionHandle,
        msg_id: u16,
        sequence: i32,
        payload: impl Into<Bytes>,
    ) -> Result<(), GateError> {
        connection.send_frame(msg_id, sequence, payload)
    }

    /// Sends the same frame to every bound player; returns how many accepted it.
    pub fn broadcast(&self, msg_id: u16, payload: impl Into<Bytes>) -> usize {
        let payload = payload.into();
        let delivered = self
            .sessions
            .connections()
            .iter()
            .filter(|connection| connection.send_frame(msg_id, 0, payload.clone()).is_ok())
            .count();
        debug!(msg_id, delivered, "Broadcast sent.");
        delivered
    }

    /// Sends an error reply carrying the request's sequence.
    pub fn send_error(
        &self,
        connection: &ConnectionHandle,
        sequence: i32,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Result<(), GateError> {
        let reply = ErrorReply::new(code, message);
        connection.send_frame(ERROR_REPLY_MSG_ID, sequence, reply.to_bytes())
    }
}
