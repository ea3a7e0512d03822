// src/core/heartbeat.rs

//! Heartbeat tracking for bound players.
//!
//! The tracker registers itself as a `SessionObserver`: binding a player starts tracking,
//! unbinding stops it. A periodic sweep closes the connection of every player whose last
//! heartbeat is older than the timeout; the regular close path then unbinds the player.

use crate::connection::ConnectionHandle;
use crate::core::errors::{DecodeError, HandlerError};
use crate::core::handler::{HandlerContext, MessageHandler};
use crate::core::pool::TrafficClass;
use crate::core::protocol::Payload;
use crate::core::session::SessionObserver;
use crate::core::{GateError, metrics};
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Heartbeat request message id.
pub const HEARTBEAT_REQ_MSG_ID: u16 = 1001;
/// Heartbeat response message id.
pub const HEARTBEAT_RES_MSG_ID: u16 = 1002;

/// Heartbeat body: `timestamp_ms:i64 | text_len:u16 | text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub timestamp_ms: i64,
    pub message: String,
}

impl Heartbeat {
    pub fn pong() -> Self {
        Self {
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            message: "pong".to_string(),
        }
    }
}

impl Payload for Heartbeat {
    fn decode(mut bytes: Bytes) -> Result<Self, DecodeError> {
        if bytes.remaining() < 10 {
            return Err(DecodeError::Truncated {
                needed: 10,
                got: bytes.remaining(),
            });
        }
        let timestamp_ms = bytes.get_i64();
        let len = bytes.get_u16() as usize;
        if bytes.remaining() < len {
            return Err(DecodeError::Truncated {
                needed: len,
                got: bytes.remaining(),
            });
        }
        let message = std::str::from_utf8(&bytes[..len])?.to_owned();
        Ok(Self {
            timestamp_ms,
            message,
        })
    }

    fn encode(&self) -> Result<Bytes, GateError> {
        let text = self.message.as_bytes();
        let len = u16::try_from(text.len())
            .map_err(|_| GateError::Internal("heartbeat text too long".into()))?;
        let mut buf = BytesMut::with_capacity(10 + text.len());
        buf.put_i64(self.timestamp_ms);
        buf.put_u16(len);
        buf.put_slice(text);
        Ok(buf.freeze())
    }
}

struct Tracked {
    connection: ConnectionHandle,
    last_seen: Instant,
}

/// Last-heartbeat bookkeeping per bound player.
pub struct HeartbeatTracker {
    players: DashMap<i64, Tracked>,
    timeout: Option<Duration>,
    sweep_interval: Duration,
}

impl HeartbeatTracker {
    /// `timeout` of `None` tracks but never disconnects.
    pub fn new(timeout: Option<Duration>, sweep_interval: Duration) -> Self {
        Self {
            players: DashMap::new(),
            timeout,
            sweep_interval,
        }
    }

    /// Records a heartbeat. Returns false if the player is not tracked.
    pub fn touch(&self, player_id: i64) -> bool {
        match self.players.get_mut(&player_id) {
            Some(mut tracked) => {
                tracked.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn is_tracked(&self, player_id: i64) -> bool {
        self.players.contains_key(&player_id)
    }

    pub fn tracked_count(&self) -> usize {
        self.players.len()
    }

    /// Closes the connections of players silent since before `now - timeout` and
    /// returns their ids.
    pub fn sweep(&self, now: Instant) -> Vec<i64> {
        let Some(timeout) = self.timeout else {
            return Vec::new();
        };
        let expired: Vec<(i64, ConnectionHandle)> = self
            .players
            .iter()
            .filter(|entry| now.saturating_duration_since(entry.last_seen) > timeout)
            .map(|entry| (*entry.key(), entry.connection.clone()))
            .collect();

        expired
            .into_iter()
            .filter(|(player_id, connection)| self.expire(*player_id, connection, now, timeout))
            .map(|(player_id, _)| player_id)
            .collect()
    }

    /// Drops `player_id` if it is still tracked on `connection` and still silent, then
    /// closes that connection. A player that re-bound or sent a heartbeat since the
    /// snapshot is left alone.
    fn expire(
        &self,
        player_id: i64,
        connection: &ConnectionHandle,
        now: Instant,
        timeout: Duration,
    ) -> bool {
        let removed = self.players.remove_if(&player_id, |_, tracked| {
            tracked.connection.same_connection(connection)
                && now.saturating_duration_since(tracked.last_seen) > timeout
        });
        if removed.is_none() {
            debug!(player_id, "Player re-bound or heartbeated during the sweep, kept.");
            return false;
        }
        warn!(
            player_id,
            conn = connection.id(),
            "Heartbeat timed out, closing connection {}.",
            connection.peer_addr()
        );
        metrics::HEARTBEAT_TIMEOUTS_TOTAL.inc();
        connection.close();
        true
    }

    /// Runs the periodic sweep until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        if self.timeout.is_none() {
            info!("Heartbeat timeout disabled; sweep task not started.");
            return;
        }
        let mut interval = tokio::time::interval(self.sweep_interval);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let expired = self.sweep(Instant::now());
                    if !expired.is_empty() {
                        info!("Heartbeat sweep disconnected {} player(s).", expired.len());
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Heartbeat sweeper shutting down.");
                    return;
                }
            }
        }
    }
}

impl SessionObserver for HeartbeatTracker {
    fn on_player_bound(&self, player_id: i64, connection: &ConnectionHandle) {
        self.players.insert(
            player_id,
            Tracked {
                connection: connection.clone(),
                last_seen: Instant::now(),
            },
        );
        debug!(player_id, "Heartbeat tracking started.");
    }

    fn on_player_unbound(&self, player_id: i64) {
        if self.players.remove(&player_id).is_some() {
            debug!(player_id, "Heartbeat tracking stopped.");
        }
    }
}

/// Answers heartbeat requests on the system pool.
pub struct HeartbeatHandler {
    tracker: Arc<HeartbeatTracker>,
}

impl HeartbeatHandler {
    pub fn new(tracker: Arc<HeartbeatTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl MessageHandler for HeartbeatHandler {
    type Payload = Heartbeat;

    fn name(&self) -> &'static str {
        "heartbeat"
    }

    fn traffic_class(&self) -> TrafficClass {
        TrafficClass::System
    }

    async fn handle(&self, ctx: HandlerContext, payload: Heartbeat) -> Result<(), HandlerError> {
        let player_id = ctx.require_player()?;
        debug!(player_id, message = %payload.message, "Heartbeat received.");
        self.tracker.touch(player_id);
        ctx.reply_with(HEARTBEAT_RES_MSG_ID, &Heartbeat::pong())?;
        Ok(())
    }
}
