// src/connection/handler.rs

//! Defines the `ConnectionHandler` which manages the full lifecycle of a client connection.

use super::guard::ConnectionGuard;
use super::handle::{ConnectionHandle, Transport};
use super::idle::{IdleSettings, IdleState, IdleTracker};
use super::pipeline::{self, FrameReader, FrameWriter, PipelineSettings};
use super::sniffer::{Protocol, ProtocolSniffer};
use super::table::ConnectionTable;
use crate::core::handler::Dispatcher;
use crate::core::protocol::Frame;
use crate::core::{GateError, metrics};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Upper bound for sniffing plus the WebSocket upgrade when no read idle limit is set.
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-connection settings derived from the server configuration.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub pipeline: PipelineSettings,
    pub idle: IdleSettings,
    pub write_queue_capacity: usize,
}

impl ConnectionSettings {
    fn handshake_timeout(&self) -> Duration {
        self.idle
            .read
            .or(self.idle.all)
            .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT)
    }
}

/// Services shared by every connection.
pub struct ConnectionServices {
    pub dispatcher: Arc<Dispatcher>,
    pub connections: Arc<ConnectionTable>,
    pub settings: ConnectionSettings,
}

/// Manages the full lifecycle of a client connection.
pub struct ConnectionHandler<S> {
    connection: ConnectionHandle,
    reader: FrameReader<S>,
    writer: FrameWriter<S>,
    outbound_rx: mpsc::Receiver<Frame>,
    idle: Arc<IdleTracker>,
    services: Arc<ConnectionServices>,
    global_shutdown_rx: broadcast::Receiver<()>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Sniffs the protocol of a freshly accepted stream and installs the pipeline.
    pub async fn accept(
        stream: S,
        peer: SocketAddr,
        id: u64,
        services: Arc<ConnectionServices>,
        global_shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<Self, GateError> {
        let settings = &services.settings;
        let (protocol, reader, writer) =
            tokio::time::timeout(settings.handshake_timeout(), async {
                let (protocol, sniffed) = ProtocolSniffer::sniff(stream).await?;
                let (reader, writer) =
                    pipeline::establish(protocol, sniffed, &settings.pipeline).await?;
                Ok::<_, GateError>((protocol, reader, writer))
            })
            .await
            .map_err(|_| {
                GateError::ProtocolViolation(format!("handshake with {peer} timed out"))
            })??;

        let transport = match protocol {
            Protocol::TcpRaw => Transport::Tcp,
            Protocol::WebSocket => Transport::WebSocket,
        };
        metrics::CONNECTIONS_RECEIVED_TOTAL
            .with_label_values(&[transport.to_string().as_str()])
            .inc();
        info!(conn = id, %transport, "Connection from {} established.", peer);

        let (connection, outbound_rx) = ConnectionHandle::with_frame_limit(
            id,
            peer,
            transport,
            settings.write_queue_capacity,
            settings.pipeline.max_frame_size,
        );
        let idle = Arc::new(IdleTracker::new(settings.idle));

        Ok(Self {
            connection,
            reader,
            writer,
            outbound_rx,
            idle,
            services,
            global_shutdown_rx,
        })
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// The main event loop for the connection, handling incoming frames and signals.
    pub async fn run(self) -> Result<(), GateError> {
        let Self {
            connection,
            mut reader,
            writer,
            outbound_rx,
            idle,
            services,
            mut global_shutdown_rx,
        } = self;

        let _guard = ConnectionGuard::new(
            connection.clone(),
            services.dispatcher.sessions().clone(),
            services.connections.clone(),
        );

        let writer_task = tokio::spawn(write_loop(
            writer,
            outbound_rx,
            connection.clone(),
            idle.clone(),
        ));

        let mut kill_rx = connection.kill_signal();
        let mut idle_check = tokio::time::interval(idle.settings().check_period());
        idle_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let peer = connection.peer_addr();
        let id = connection.id();

        let result = loop {
            tokio::select! {
                // Prioritize shutdown signals over other events.
                biased;
                _ = global_shutdown_rx.recv() => {
                    info!(conn = id, "Connection handler for {} received GLOBAL shutdown signal.", peer);
                    break Ok(());
                }
                _ = async { let _ = kill_rx.wait_for(|killed| *killed).await; } => {
                    debug!(conn = id, "Connection handler for {} received kill signal.", peer);
                    break Ok(());
                }
                _ = idle_check.tick() => {
                    match idle.check(Instant::now()) {
                        IdleState::Active => {}
                        state if !state.closes_connection() => {
                            warn!(conn = id, "Connection {} has not been written to for a while.", peer);
                        }
                        state => {
                            info!(conn = id, ?state, "Closing idle connection {}.", peer);
                            metrics::IDLE_DISCONNECTS_TOTAL.inc();
                            break Ok(());
                        }
                    }
                }
                next = reader.next_frame() => {
                    match next {
                        Ok(Some(frame)) => {
                            idle.record_read();
                            metrics::FRAMES_RECEIVED_TOTAL.inc();
                            debug!(conn = id, msg_id = frame.msg_id, sequence = frame.sequence, "Received frame.");
                            services.dispatcher.dispatch(&connection, frame).await;
                        }
                        Ok(None) => {
                            debug!(conn = id, "Connection from {} closed by peer.", peer);
                            break Ok(());
                        }
                        Err(e) if is_decode_error(&e) => {
                            metrics::DECODE_FAILURES_TOTAL.inc();
                            warn!(conn = id, "Closing connection {}: {}", peer, e);
                            break Ok(());
                        }
                        Err(e) if is_normal_disconnect(&e) => {
                            debug!(conn = id, "Connection from {} closed by peer: {}", peer, e);
                            break Ok(());
                        }
                        Err(e) => break Err(e),
                    }
                }
            }
        };

        connection.close();
        if let Err(e) = writer_task.await {
            warn!(conn = id, "Writer task for {} failed: {e}", peer);
        }
        result
    }
}

/// Drains the outbound queue onto the socket. The only task that writes to it.
///
/// A failed write closes the connection so the reader loop ends too.
async fn write_loop<S>(
    mut writer: FrameWriter<S>,
    mut outbound_rx: mpsc::Receiver<Frame>,
    connection: ConnectionHandle,
    idle: Arc<IdleTracker>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let id = connection.id();
    let mut kill_rx = connection.kill_signal();
    let mut healthy = true;
    loop {
        tokio::select! {
            biased;
            _ = async { let _ = kill_rx.wait_for(|killed| *killed).await; } => break,
            next = outbound_rx.recv() => {
                let Some(frame) = next else { break };
                if let Err(e) = writer.send(frame).await {
                    debug!(conn = id, "Write failed, closing connection: {e}");
                    connection.close();
                    healthy = false;
                    break;
                }
                idle.record_write();
            }
        }
    }
    outbound_rx.close();
    // Frames queued before the close still go out.
    while healthy && let Ok(frame) = outbound_rx.try_recv() {
        if let Err(e) = writer.send(frame).await {
            debug!(conn = id, "Write failed while flushing on close: {e}");
            break;
        }
    }
    if let Err(e) = writer.close().await {
        debug!(conn = id, "Error while closing transport: {e}");
    }
}

fn is_decode_error(e: &GateError) -> bool {
    matches!(
        e,
        GateError::FrameTooLarge { .. }
            | GateError::MalformedFrame(_)
            | GateError::ProtocolViolation(_)
    )
}

/// Helper function to check for non-critical disconnection errors.
fn is_normal_disconnect(e: &GateError) -> bool {
    match e {
        GateError::Io(arc_err) => matches!(
            arc_err.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::ConnectionAborted
        ),
        GateError::WebSocket(_) => true,
        _ => false,
    }
}
