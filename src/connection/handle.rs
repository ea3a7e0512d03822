// src/connection/handle.rs

//! Defines `ConnectionHandle`, the cheap-clone reference to one live connection that
//! handlers, the session registry and the shutdown path hold on to.

use crate::core::protocol::{DEFAULT_MAX_FRAME_SIZE, Frame};
use crate::core::{GateError, metrics};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use strum_macros::Display;
use tokio::sync::{mpsc, watch};
use tracing::warn;

/// Sentinel stored while no player is bound.
const NO_PLAYER: i64 = i64::MIN;

/// The transport a connection was sniffed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Transport {
    Tcp,
    WebSocket,
}

struct HandleInner {
    id: u64,
    peer: SocketAddr,
    transport: Transport,
    max_frame_size: usize,
    outbound: mpsc::Sender<Frame>,
    kill_tx: watch::Sender<bool>,
    bound_player: AtomicI64,
}

/// A handle to a live connection.
///
/// Sending never touches the socket: frames go into a bounded queue that the
/// connection's single writer task drains, so writes on one socket are serialized.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("transport", &self.inner.transport)
            .field("bound_player", &self.bound_player())
            .finish()
    }
}

impl ConnectionHandle {
    /// Creates a handle plus the receiving end of its outbound queue, with the default
    /// frame size limit.
    pub fn new(
        id: u64,
        peer: SocketAddr,
        transport: Transport,
        write_queue_capacity: usize,
    ) -> (Self, mpsc::Receiver<Frame>) {
        Self::with_frame_limit(id, peer, transport, write_queue_capacity, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Like [`new`](Self::new), rejecting outbound frames whose `length` exceeds
    /// `max_frame_size`.
    pub fn with_frame_limit(
        id: u64,
        peer: SocketAddr,
        transport: Transport,
        write_queue_capacity: usize,
        max_frame_size: usize,
    ) -> (Self, mpsc::Receiver<Frame>) {
        let (outbound, outbound_rx) = mpsc::channel(write_queue_capacity.max(1));
        let (kill_tx, _) = watch::channel(false);
        let handle = Self {
            inner: Arc::new(HandleInner {
                id,
                peer,
                transport,
                max_frame_size,
                outbound,
                kill_tx,
                bound_player: AtomicI64::new(NO_PLAYER),
            }),
        };
        (handle, outbound_rx)
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    pub fn transport(&self) -> Transport {
        self.inner.transport
    }

    /// Queues `frame` for the writer task.
    ///
    /// A frame over the size limit is refused here and the connection stays usable.
    /// A peer that lets its queue fill up is too slow to keep; its connection is closed.
    pub fn send(&self, frame: Frame) -> Result<(), GateError> {
        if self.is_closed() {
            return Err(GateError::ConnectionClosed(self.inner.id));
        }
        let declared = frame.wire_length();
        if declared > self.inner.max_frame_size {
            return Err(GateError::FrameTooLarge {
                declared,
                max: self.inner.max_frame_size,
            });
        }
        match self.inner.outbound.try_send(frame) {
            Ok(()) => {
                metrics::FRAMES_SENT_TOTAL.inc();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(frame)) => {
                warn!(
                    conn = self.inner.id,
                    msg_id = frame.msg_id,
                    "Outbound queue full for {}, closing slow connection.",
                    self.inner.peer
                );
                self.close();
                Err(GateError::ConnectionClosed(self.inner.id))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(GateError::ConnectionClosed(self.inner.id))
            }
        }
    }

    /// Builds and queues a frame.
    pub fn send_frame(
        &self,
        msg_id: u16,
        sequence: i32,
        payload: impl Into<Bytes>,
    ) -> Result<(), GateError> {
        self.send(Frame::new(msg_id, sequence, payload))
    }

    /// Asks the connection to close. Frames queued before this still go out.
    pub fn close(&self) {
        self.inner.kill_tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.kill_tx.borrow() || self.inner.outbound.is_closed()
    }

    /// A receiver that flips to `true` once `close` has been called.
    pub fn kill_signal(&self) -> watch::Receiver<bool> {
        self.inner.kill_tx.subscribe()
    }

    /// The player bound to this connection, if any.
    pub fn bound_player(&self) -> Option<i64> {
        match self.inner.bound_player.load(Ordering::Acquire) {
            NO_PLAYER => None,
            id => Some(id),
        }
    }

    pub(crate) fn set_bound_player(&self, player_id: Option<i64>) {
        self.inner
            .bound_player
            .store(player_id.unwrap_or(NO_PLAYER), Ordering::Release);
    }

    /// Clears the bound player only if it is still `player_id`.
    pub(crate) fn clear_bound_player(&self, player_id: i64) -> bool {
        self.inner
            .bound_player
            .compare_exchange(player_id, NO_PLAYER, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// True when both handles refer to the same connection.
    pub fn same_connection(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
