// src/server/connection_loop.rs

//! Contains the accept loop, the network side of the shutdown sequence and the supervisor
//! that decides when to shut down.

use crate::connection::{ConnectionHandler, ConnectionServices, ConnectionTable};
use crate::core::GateError;
use crate::core::shutdown::{ConnectionAcceptor, ShutdownCoordinator, ShutdownReport};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{Notify, Semaphore, broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// How long `stop_accepting` waits for the accept loop to drop the listener.
const LISTENER_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
/// How long `release` waits for connection tasks after signalling them.
const CONNECTION_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);
/// How long the supervisor waits for background tasks after the shutdown sequence.
const BACKGROUND_TASK_TIMEOUT: Duration = Duration::from_secs(10);
/// Pause after a failed `accept` so errors like EMFILE do not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// The listener side of the server as seen by the shutdown coordinator.
pub struct NetworkAcceptor {
    stop_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    connections: Arc<ConnectionTable>,
    shutdown_tx: broadcast::Sender<()>,
}

impl NetworkAcceptor {
    /// Spawns the accept loop and returns the acceptor controlling it.
    pub fn spawn(
        listener: TcpListener,
        services: Arc<ConnectionServices>,
        permits: Arc<Semaphore>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (closed_tx, closed_rx) = watch::channel(false);
        let connections = services.connections.clone();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            services,
            permits,
            shutdown_tx.clone(),
            stop_rx,
            closed_tx,
        ));
        Self {
            stop_tx,
            closed_rx,
            accept_task: Mutex::new(Some(accept_task)),
            connections,
            shutdown_tx,
        }
    }
}

#[async_trait]
impl ConnectionAcceptor for NetworkAcceptor {
    async fn stop_accepting(&self) -> Result<(), GateError> {
        self.stop_tx.send_replace(true);
        let mut closed_rx = self.closed_rx.clone();
        // A dropped sender means the accept loop is gone, which is just as closed.
        let waited = tokio::time::timeout(LISTENER_CLOSE_TIMEOUT, closed_rx.wait_for(|closed| *closed))
            .await
            .is_ok();
        if !waited {
            return Err(GateError::Internal(
                "listener did not close in time".to_string(),
            ));
        }
        info!("Listener closed, no new connections are accepted.");
        Ok(())
    }

    async fn release(&self) -> Result<(), GateError> {
        let signalled = self.connections.close_all();
        info!("Closing {} live connection(s).", signalled);
        // Also stops the background tasks.
        let _ = self.shutdown_tx.send(());

        let task = self.accept_task.lock().take();
        let Some(task) = task else {
            return Ok(());
        };
        match tokio::time::timeout(CONNECTION_CLOSE_TIMEOUT, task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(GateError::Internal(format!("accept loop failed: {e}"))),
            Err(_) => Err(GateError::Internal(format!(
                "{} connection(s) still open after {:?}",
                self.connections.len(),
                CONNECTION_CLOSE_TIMEOUT
            ))),
        }
    }
}

/// Accepts connections until told to stop, then waits for the live ones to finish.
async fn accept_loop(
    listener: TcpListener,
    services: Arc<ConnectionServices>,
    permits: Arc<Semaphore>,
    shutdown_tx: broadcast::Sender<()>,
    mut stop_rx: watch::Receiver<bool>,
    closed_tx: watch::Sender<bool>,
) {
    let mut next_connection_id: u64 = 0;
    let mut client_tasks = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = async { let _ = stop_rx.wait_for(|stop| *stop).await; } => break,

            res = listener.accept() => {
                let (socket, addr) = match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        continue;
                    }
                };
                let Ok(permit) = permits.clone().try_acquire_owned() else {
                    warn!("Connection limit reached, refusing connection from {}.", addr);
                    continue;
                };
                if let Err(e) = socket.set_nodelay(true) {
                    debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                }

                next_connection_id = next_connection_id.wrapping_add(1);
                let id = next_connection_id;
                let services = services.clone();
                let global_shutdown_rx = shutdown_tx.subscribe();
                debug!(conn = id, "Accepted new connection from: {}", addr);

                client_tasks.spawn(async move {
                    let _permit = permit;
                    match ConnectionHandler::accept(socket, addr, id, services, global_shutdown_rx).await {
                        Ok(handler) => {
                            if let Err(e) = handler.run().await {
                                warn!(conn = id, "Connection from {} terminated unexpectedly: {}", addr, e);
                            }
                        }
                        Err(e) => warn!(conn = id, "Failed to set up connection from {}: {}", addr, e),
                    }
                });
            }

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A client handler panicked: {e:?}");
                }
            }
        }
    }

    drop(listener);
    closed_tx.send_replace(true);

    if !client_tasks.is_empty() {
        info!(
            "Waiting for {} connection(s) to finish.",
            client_tasks.len()
        );
    }
    while let Some(res) = client_tasks.join_next().await {
        if let Err(e) = res
            && e.is_panic()
        {
            error!("A client handler panicked: {e:?}");
        }
    }
    info!("All client connections closed.");
}

/// Waits for a reason to shut down, runs the shutdown sequence and reaps the background
/// tasks.
pub async fn supervise(
    mut background_tasks: JoinSet<Result<(), anyhow::Error>>,
    coordinator: Arc<ShutdownCoordinator>,
    trigger: Arc<Notify>,
    handle_signals: bool,
) -> ShutdownReport {
    tokio::select! {
        _ = trigger.notified() => info!("Shutdown requested."),
        name = shutdown_signal(), if handle_signals => {
            info!("{} received, initiating graceful shutdown.", name);
        }
        _ = watch_background_tasks(&mut background_tasks) => {
            error!("CRITICAL: a background task failed. Shutting down.");
        }
    }

    let report = coordinator.shutdown().await;

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(BACKGROUND_TASK_TIMEOUT, async {
        while let Some(res) = background_tasks.join_next().await {
            match res {
                Ok(Err(e)) => warn!("Background task ended with an error: {}", e),
                Err(e) if e.is_panic() => error!("Background task panicked: {e:?}"),
                _ => {}
            }
        }
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    }
    info!("Server shutdown complete.");
    report
}

/// Resolves when a background task fails or panics. Tasks that return `Ok` are allowed to
/// finish early (e.g. a disabled feature).
async fn watch_background_tasks(background_tasks: &mut JoinSet<Result<(), anyhow::Error>>) {
    loop {
        match background_tasks.join_next().await {
            Some(Ok(Ok(()))) => debug!("A background task finished."),
            Some(Ok(Err(e))) => {
                error!("Background task failed: {}", e);
                return;
            }
            Some(Err(e)) => {
                error!("Background task panicked: {e:?}");
                return;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

async fn shutdown_signal() -> &'static str {
    let (Ok(mut sigint), Ok(mut sigterm)) = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) else {
        error!("Failed to register SIGINT/SIGTERM handlers, falling back to Ctrl-C.");
        let _ = tokio::signal::ctrl_c().await;
        return "Ctrl-C";
    };
    tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    }
}
