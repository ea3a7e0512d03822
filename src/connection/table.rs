// src/connection/table.rs

use super::ConnectionHandle;
use dashmap::DashMap;

/// All live connections, keyed by connection id.
#[derive(Default)]
pub struct ConnectionTable {
    connections: DashMap<u64, ConnectionHandle>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, connection: ConnectionHandle) {
        self.connections.insert(connection.id(), connection);
    }

    pub fn remove(&self, id: u64) -> Option<ConnectionHandle> {
        self.connections.remove(&id).map(|(_, connection)| connection)
    }

    pub fn get(&self, id: u64) -> Option<ConnectionHandle> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Signals every live connection to close; returns how many were signalled.
    pub fn close_all(&self) -> usize {
        let snapshot: Vec<ConnectionHandle> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for connection in &snapshot {
            connection.close();
        }
        snapshot.len()
    }
}
