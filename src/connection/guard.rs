// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for connection resource management.

use super::{ConnectionHandle, ConnectionTable};
use crate::core::metrics;
use crate::core::session::SessionRegistry;
use std::sync::Arc;
use tracing::debug;

/// An RAII guard to ensure connection resources are always cleaned up when a
/// connection handler's scope is exited, whatever the reason for the exit.
pub struct ConnectionGuard {
    connection: ConnectionHandle,
    sessions: Arc<SessionRegistry>,
    table: Arc<ConnectionTable>,
}

impl ConnectionGuard {
    /// Registers the connection in the live table and counts it as connected.
    pub fn new(
        connection: ConnectionHandle,
        sessions: Arc<SessionRegistry>,
        table: Arc<ConnectionTable>,
    ) -> Self {
        table.insert(connection.clone());
        metrics::CONNECTED_CLIENTS.inc();
        Self {
            connection,
            sessions,
            table,
        }
    }
}

impl Drop for ConnectionGuard {
    /// Unbinds the connection's player (if the session still points here), removes the
    /// connection from the live table and signals its writer to stop.
    fn drop(&mut self) {
        metrics::CONNECTED_CLIENTS.dec();
        debug!(
            conn = self.connection.id(),
            "ConnectionGuard dropping, cleaning up resources for connection {}",
            self.connection.peer_addr()
        );

        if let Some(player_id) = self.sessions.unbind_connection(&self.connection) {
            debug!(player_id, conn = self.connection.id(), "Unbound player on close.");
        }
        if self.table.remove(self.connection.id()).is_none() {
            debug!(
                "Connection {} was not in the live table upon cleanup.",
                self.connection.id()
            );
        }
        self.connection.close();
    }
}
