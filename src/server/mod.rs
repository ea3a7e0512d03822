// src/server/mod.rs

//! Server bootstrap: wires the components, starts the accept loop and the background
//! tasks, and owns the shutdown sequence.

use crate::config::Config;
use crate::connection::ConnectionTable;
use crate::core::GateError;
use crate::core::handler::{HandlerRegistryBuilder, MessageHandler};
use crate::core::id_generator::IdGenerator;
use crate::core::persistence::{Entity, Flushable, PersistenceBackend, WriteBehindCache};
use crate::core::protocol::Payload;
use crate::core::session::{ResponseSender, SessionObserver, SessionRegistry};
use crate::core::shutdown::{ShutdownCoordinator, ShutdownReport};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

mod connection_loop;
mod context;
mod initialization;
mod metrics_server;
mod spawner;

pub use connection_loop::NetworkAcceptor;
pub use context::ServerContext;

/// Collects game handlers, entity stores and session observers before start-up.
pub struct ServerBuilder {
    config: Config,
    handlers: HandlerRegistryBuilder,
    stores: Vec<Arc<dyn Flushable>>,
    observers: Vec<Arc<dyn SessionObserver>>,
    handle_signals: bool,
}

impl ServerBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            handlers: HandlerRegistryBuilder::new(),
            stores: Vec::new(),
            observers: Vec::new(),
            handle_signals: true,
        }
    }

    /// Registers a game handler. Duplicate or reserved ids fail here, before start-up.
    pub fn register<H>(mut self, msg_id: u16, handler: H) -> Result<Self, GateError>
    where
        H: MessageHandler,
        H::Payload: Payload,
    {
        self.handlers.register(msg_id, handler)?;
        Ok(self)
    }

    /// Gives direct access to the registry builder, e.g. for custom payload parsers.
    pub fn handlers_mut(&mut self) -> &mut HandlerRegistryBuilder {
        &mut self.handlers
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Creates a write-behind cache batched by `persistence.batch_size` and registers it
    /// like [`with_store`](Self::with_store).
    pub fn write_behind_cache<E, B>(
        &mut self,
        name: impl Into<String>,
        backend: Arc<B>,
    ) -> Arc<WriteBehindCache<E, B>>
    where
        E: Entity,
        B: PersistenceBackend<E>,
    {
        let cache = Arc::new(WriteBehindCache::new(
            name,
            backend,
            self.config.persistence.batch_size,
        ));
        self.stores.push(cache.clone());
        cache
    }

    /// Adds a write-behind store flushed periodically and once more on shutdown.
    pub fn with_store(mut self, store: Arc<dyn Flushable>) -> Self {
        self.stores.push(store);
        self
    }

    pub fn with_session_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Whether SIGINT/SIGTERM start the shutdown sequence. On by default.
    pub fn handle_signals(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    /// Builds every component, binds the listener and starts serving.
    pub async fn start(self) -> Result<RunningServer> {
        let mut ctx =
            initialization::setup(self.config, self.handlers, self.stores, self.observers).await?;
        spawner::spawn_all(&mut ctx).context("Failed to spawn background tasks")?;

        let ServerContext {
            config,
            listener,
            local_addr,
            shutdown_tx,
            background_tasks,
            services,
            pools,
            sessions,
            id_generator,
            connection_permits,
            ..
        } = ctx;

        let connections = services.connections.clone();
        let sender = services.dispatcher.sender().clone();
        let acceptor = Arc::new(NetworkAcceptor::spawn(
            listener,
            services,
            connection_permits,
            shutdown_tx,
        ));
        let coordinator = Arc::new(ShutdownCoordinator::new(
            acceptor,
            pools.iter().cloned().collect(),
            config.drain_timeout(),
        ));
        let trigger = Arc::new(Notify::new());
        let supervisor = tokio::spawn(connection_loop::supervise(
            background_tasks,
            coordinator.clone(),
            trigger.clone(),
            self.handle_signals,
        ));

        Ok(RunningServer {
            local_addr,
            sessions,
            sender,
            connections,
            id_generator,
            coordinator,
            trigger,
            supervisor,
        })
    }
}

/// A started server. Dropping it does not stop the server; call [`shutdown`](Self::shutdown)
/// or [`wait`](Self::wait).
pub struct RunningServer {
    local_addr: SocketAddr,
    sessions: Arc<SessionRegistry>,
    sender: ResponseSender,
    connections: Arc<ConnectionTable>,
    id_generator: Arc<IdGenerator>,
    coordinator: Arc<ShutdownCoordinator>,
    trigger: Arc<Notify>,
    supervisor: JoinHandle<ShutdownReport>,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn sender(&self) -> &ResponseSender {
        &self.sender
    }

    pub fn connections(&self) -> &Arc<ConnectionTable> {
        &self.connections
    }

    pub fn id_generator(&self) -> &Arc<IdGenerator> {
        &self.id_generator
    }

    pub fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.coordinator
    }

    /// Starts the shutdown sequence and waits for it to complete.
    pub async fn shutdown(self) -> Result<ShutdownReport> {
        self.trigger.notify_one();
        self.wait().await
    }

    /// Waits until the server has shut down for any reason.
    pub async fn wait(self) -> Result<ShutdownReport> {
        self.supervisor
            .await
            .context("Server supervisor task failed")
    }
}

/// Runs the server with only the built-in handlers until a shutdown signal arrives.
pub async fn run(config: Config) -> Result<()> {
    let server = ServerBuilder::new(config).start().await?;
    let report = server.wait().await?;
    if !report.is_clean() {
        tracing::warn!(
            "Shutdown was not clean: {} task(s) abandoned, errors: {:?}",
            report.abandoned(),
            report.stage_errors
        );
    }
    Ok(())
}
