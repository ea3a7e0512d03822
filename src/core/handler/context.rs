// src/core/handler/context.rs

use crate::config::UnboundSessionPolicy;
use crate::connection::ConnectionHandle;
use crate::core::errors::HandlerError;
use crate::core::protocol::{ErrorCode, Payload};
use crate::core::session::{ResponseSender, SessionRegistry};
use crate::core::GateError;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything a handler invocation may touch: the originating connection, the request's
/// sequence, and the session and sender services.
#[derive(Clone)]
pub struct HandlerContext {
    connection: ConnectionHandle,
    msg_id: u16,
    sequence: i32,
    sessions: Arc<SessionRegistry>,
    sender: ResponseSender,
    unbound_policy: UnboundSessionPolicy,
}

impl HandlerContext {
    pub fn new(
        connection: ConnectionHandle,
        msg_id: u16,
        sequence: i32,
        sessions: Arc<SessionRegistry>,
        sender: ResponseSender,
        unbound_policy: UnboundSessionPolicy,
    ) -> Self {
        Self {
            connection,
            msg_id,
            sequence,
            sessions,
            sender,
            unbound_policy,
        }
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub fn msg_id(&self) -> u16 {
        self.msg_id
    }

    pub fn sequence(&self) -> i32 {
        self.sequence
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn sender(&self) -> &ResponseSender {
        &self.sender
    }

    /// The player bound to the originating connection.
    pub fn player_id(&self) -> Option<i64> {
        self.connection.bound_player()
    }

    /// Returns the bound player or applies the unbound-session policy.
    ///
    /// Handlers propagate the error with `?`; the dispatcher knows not to treat it as a
    /// handler failure.
    pub fn require_player(&self) -> Result<i64, HandlerError> {
        if let Some(player_id) = self.player_id() {
            return Ok(player_id);
        }
        warn!(
            msg_id = self.msg_id,
            sequence = self.sequence,
            conn = self.connection.id(),
            policy = %self.unbound_policy,
            "Message requires a bound player but {} has none.",
            self.connection.peer_addr()
        );
        match self.unbound_policy {
            UnboundSessionPolicy::Drop => {}
            UnboundSessionPolicy::Reject => {
                if let Err(e) = self.sender.send_error(
                    &self.connection,
                    self.sequence,
                    ErrorCode::NoSession,
                    "no player is bound to this connection",
                ) {
                    debug!(conn = self.connection.id(), "No-session reply not delivered: {e}");
                }
            }
            UnboundSessionPolicy::Disconnect => self.connection.close(),
        }
        Err(HandlerError::NoSession)
    }

    /// Binds `player_id` to the originating connection.
    pub fn bind_player(&self, player_id: i64) -> Option<ConnectionHandle> {
        self.sessions.bind(player_id, &self.connection)
    }

    /// Unbinds whichever player the originating connection carries.
    pub fn unbind_player(&self) -> Option<i64> {
        self.sessions.unbind_connection(&self.connection)
    }

    /// Replies on the originating connection with the request's sequence.
    pub fn reply(&self, msg_id: u16, payload: impl Into<Bytes>) -> Result<(), GateError> {
        self.sender
            .send_on_connection(&self.connection, msg_id, self.sequence, payload)
    }

    /// Encodes and sends a typed reply.
    pub fn reply_with<P: Payload>(&self, msg_id: u16, payload: &P) -> Result<(), GateError> {
        self.reply(msg_id, payload.encode()?)
    }

    pub fn reply_error(&self, code: ErrorCode, message: impl Into<String>) -> Result<(), GateError> {
        self.sender
            .send_error(&self.connection, self.sequence, code, message)
    }
}
