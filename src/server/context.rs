// src/server/context.rs

use crate::config::Config;
use crate::connection::ConnectionServices;
use crate::core::heartbeat::HeartbeatTracker;
use crate::core::id_generator::IdGenerator;
use crate::core::persistence::Flushable;
use crate::core::pool::WorkerPools;
use crate::core::session::SessionRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;

/// Holds all the initialized state required to run the server's main loop.
pub struct ServerContext {
    pub config: Arc<Config>,
    pub listener: TcpListener,
    pub local_addr: SocketAddr,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<Result<(), anyhow::Error>>,
    pub services: Arc<ConnectionServices>,
    pub pools: Arc<WorkerPools>,
    pub sessions: Arc<SessionRegistry>,
    pub heartbeat: Arc<HeartbeatTracker>,
    pub id_generator: Arc<IdGenerator>,
    pub stores: Vec<Arc<dyn Flushable>>,
    pub connection_permits: Arc<Semaphore>,
}
