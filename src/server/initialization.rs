// src/server/initialization.rs

//! Builds every server component from the configuration, in dependency order, and binds
//! the listener.

use super::context::ServerContext;
use crate::config::Config;
use crate::connection::{ConnectionServices, ConnectionSettings, ConnectionTable, PipelineSettings};
use crate::core::handler::{Dispatcher, HandlerRegistryBuilder};
use crate::core::heartbeat::HeartbeatTracker;
use crate::core::id_generator::IdGenerator;
use crate::core::persistence::Flushable;
use crate::core::pool::WorkerPools;
use crate::core::session::{SessionObserver, SessionRegistry};
use crate::handlers;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tracing::info;

/// Initializes all server components before starting the main loop.
pub async fn setup(
    config: Config,
    mut handlers: HandlerRegistryBuilder,
    stores: Vec<Arc<dyn Flushable>>,
    mut observers: Vec<Arc<dyn SessionObserver>>,
) -> Result<ServerContext> {
    config.validate()?;
    log_startup_info(&config);
    let config = Arc::new(config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let id_generator = Arc::new(IdGenerator::new(config.machine_id)?);

    let heartbeat_timeout =
        (config.heartbeat.timeout_secs > 0).then(|| Duration::from_secs(config.heartbeat.timeout_secs));
    let heartbeat = Arc::new(HeartbeatTracker::new(
        heartbeat_timeout,
        Duration::from_secs(config.heartbeat.sweep_interval_secs.max(1)),
    ));
    observers.push(heartbeat.clone());
    let sessions = Arc::new(SessionRegistry::new(observers));

    handlers::register_builtin(&mut handlers, heartbeat.clone())
        .context("Failed to register built-in handlers")?;
    let registry = handlers.build();
    info!(
        "Handler registry frozen with {} handler(s): {:?}",
        registry.handler_count(),
        registry.message_ids()
    );

    let pools = Arc::new(WorkerPools::new(&config.pools).context("Failed to start worker pools")?);
    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        pools.clone(),
        sessions.clone(),
        config.unbound_session_policy,
    ));

    let services = Arc::new(ConnectionServices {
        dispatcher,
        connections: Arc::new(ConnectionTable::new()),
        settings: ConnectionSettings {
            pipeline: PipelineSettings {
                max_frame_size: config.max_frame_size,
                websocket_path: config.websocket_path.clone(),
            },
            idle: config.idle.to_settings(),
            write_queue_capacity: config.write_queue_capacity,
        },
    });

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
    let local_addr = listener.local_addr()?;
    info!(
        "Game server listening on {} (raw TCP and WebSocket at '{}')",
        local_addr, config.websocket_path
    );
    let connection_permits = Arc::new(Semaphore::new(config.max_connections));

    Ok(ServerContext {
        config,
        listener,
        local_addr,
        shutdown_tx,
        background_tasks: JoinSet::new(),
        services,
        pools,
        sessions,
        heartbeat,
        id_generator,
        stores,
        connection_permits,
    })
}

fn log_startup_info(config: &Config) {
    info!("Starting gatecore v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Pools: player={} thread(s)/{} queued, system={} thread(s)/{} queued",
        config.pools.player.size,
        config.pools.player.queue_capacity,
        config.pools.system.size,
        config.pools.system.queue_capacity
    );
    info!(
        "Limits: max_connections={}, max_frame_size={} bytes, write_queue_capacity={}",
        config.max_connections, config.max_frame_size, config.write_queue_capacity
    );
    info!(
        "Idle timeouts (s): read={}, write={}, all={}; unbound session policy: {}",
        config.idle.read_secs,
        config.idle.write_secs,
        config.idle.all_secs,
        config.unbound_session_policy
    );
}
