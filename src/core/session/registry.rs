// src/core/session/registry.rs

use crate::connection::ConnectionHandle;
use crate::core::metrics;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Hooks fired on session transitions.
///
/// Callbacks run after the map has been updated and with no lock held, once per
/// `bind` call and once per actual removal.
pub trait SessionObserver: Send + Sync {
    fn on_player_bound(&self, _player_id: i64, _connection: &ConnectionHandle) {}
    fn on_player_unbound(&self, _player_id: i64) {}
}

/// Maps player ids to the connection they are currently reachable on.
///
/// At most one connection per player: binding again supersedes the old mapping.
pub struct SessionRegistry {
    sessions: DashMap<i64, ConnectionHandle>,
    observers: Vec<Arc<dyn SessionObserver>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl SessionRegistry {
    pub fn new(observers: Vec<Arc<dyn SessionObserver>>) -> Self {
        Self {
            sessions: DashMap::new(),
            observers,
        }
    }

    /// Binds `player_id` to `connection`, returning the connection it was bound to
    /// before, if that was a different one.
    ///
    /// The superseded connection stays open but no longer carries the player.
    pub fn bind(&self, player_id: i64, connection: &ConnectionHandle) -> Option<ConnectionHandle> {
        // A connection carries one player; rebinding it to someone else releases the first.
        if let Some(current) = connection.bound_player()
            && current != player_id
        {
            self.release_if_mapped(current, connection);
        }

        let previous = self.sessions.insert(player_id, connection.clone());
        connection.set_bound_player(Some(player_id));

        let superseded = match previous {
            None => {
                metrics::ONLINE_PLAYERS.inc();
                None
            }
            Some(prev) if prev.same_connection(connection) => None,
            Some(prev) => {
                prev.clear_bound_player(player_id);
                info!(
                    player_id,
                    old_conn = prev.id(),
                    new_conn = connection.id(),
                    "Player session superseded by a new connection."
                );
                Some(prev)
            }
        };

        for observer in &self.observers {
            observer.on_player_bound(player_id, connection);
        }
        superseded
    }

    /// Removes the session of `player_id`. Returns false when there was none.
    pub fn unbind(&self, player_id: i64) -> bool {
        let Some((_, connection)) = self.sessions.remove(&player_id) else {
            return false;
        };
        connection.clear_bound_player(player_id);
        self.after_removal(player_id);
        true
    }

    /// Close-path cleanup: removes the session of the player bound to `connection`,
    /// but only if the session still points at this connection.
    pub fn unbind_connection(&self, connection: &ConnectionHandle) -> Option<i64> {
        let player_id = connection.bound_player()?;
        self.release_if_mapped(player_id, connection)
            .then_some(player_id)
    }

    fn release_if_mapped(&self, player_id: i64, connection: &ConnectionHandle) -> bool {
        let removed = self
            .sessions
            .remove_if(&player_id, |_, mapped| mapped.same_connection(connection))
            .is_some();
        if removed {
            connection.clear_bound_player(player_id);
            self.after_removal(player_id);
        } else {
            debug!(
                player_id,
                conn = connection.id(),
                "Session already moved to another connection; nothing to unbind."
            );
        }
        removed
    }

    fn after_removal(&self, player_id: i64) {
        metrics::ONLINE_PLAYERS.dec();
        for observer in &self.observers {
            observer.on_player_unbound(player_id);
        }
    }

    pub fn get(&self, player_id: i64) -> Option<ConnectionHandle> {
        self.sessions.get(&player_id).map(|entry| entry.value().clone())
    }

    pub fn is_online(&self, player_id: i64) -> bool {
        self.sessions.contains_key(&player_id)
    }

    /// A snapshot of the ids of all bound players.
    pub fn online_ids(&self) -> Vec<i64> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn online_count(&self) -> usize {
        self.sessions.len()
    }

    /// Snapshot of all bound connections.
    pub fn connections(&self) -> Vec<ConnectionHandle> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Unbinds every player, firing the unbound hook for each.
    pub fn clear_all(&self) -> usize {
        self.online_ids()
            .into_iter()
            .filter(|player_id| self.unbind(*player_id))
            .count()
    }
}
