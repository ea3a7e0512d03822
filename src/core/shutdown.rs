// src/core/shutdown.rs

//! Orderly shutdown: stop accepting, drain the worker pools, release the network.

use crate::core::GateError;
use crate::core::pool::{DrainOutcome, WorkerPool};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use strum_macros::Display;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// The network side the coordinator stops first and releases last.
#[async_trait]
pub trait ConnectionAcceptor: Send + Sync {
    /// Stops taking new connections. Existing ones stay open.
    async fn stop_accepting(&self) -> Result<(), GateError>;
    /// Closes the listener and every live connection.
    async fn release(&self) -> Result<(), GateError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[repr(u8)]
pub enum ShutdownState {
    Running = 0,
    Draining = 1,
    Stopped = 2,
}

impl ShutdownState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// What a shutdown did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub pools: Vec<DrainOutcome>,
    /// Stages that failed; later stages ran regardless.
    pub stage_errors: Vec<String>,
}

impl ShutdownReport {
    pub fn abandoned(&self) -> usize {
        self.pools.iter().map(|p| p.abandoned).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.abandoned() == 0 && self.stage_errors.is_empty()
    }
}

/// Runs the shutdown sequence exactly once.
pub struct ShutdownCoordinator {
    acceptor: Arc<dyn ConnectionAcceptor>,
    pools: Vec<Arc<WorkerPool>>,
    drain_timeout: Duration,
    state: AtomicU8,
    done_tx: watch::Sender<Option<ShutdownReport>>,
}

impl ShutdownCoordinator {
    pub fn new(
        acceptor: Arc<dyn ConnectionAcceptor>,
        pools: Vec<Arc<WorkerPool>>,
        drain_timeout: Duration,
    ) -> Self {
        let (done_tx, _) = watch::channel(None);
        Self {
            acceptor,
            pools,
            drain_timeout,
            state: AtomicU8::new(ShutdownState::Running as u8),
            done_tx,
        }
    }

    pub fn state(&self) -> ShutdownState {
        ShutdownState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// A receiver that holds `Some(report)` once shutdown has completed.
    pub fn completion(&self) -> watch::Receiver<Option<ShutdownReport>> {
        self.done_tx.subscribe()
    }

    /// Shuts everything down. A second caller waits for the first and gets its report.
    pub async fn shutdown(&self) -> ShutdownReport {
        let claimed = self
            .state
            .compare_exchange(
                ShutdownState::Running as u8,
                ShutdownState::Draining as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();

        if !claimed {
            return self.wait_for_completion().await;
        }

        info!(
            "Shutdown started, draining pools for up to {:?}.",
            self.drain_timeout
        );
        let mut report = ShutdownReport::default();

        // 1. No new connections.
        if let Err(e) = self.acceptor.stop_accepting().await {
            error!("Failed to stop accepting connections: {e}");
            report.stage_errors.push(format!("stop_accepting: {e}"));
        }

        // 2. No new tasks on any pool, then wait for each one in turn.
        for pool in &self.pools {
            pool.stop_accepting();
        }
        for pool in &self.pools {
            let outcome = pool.shutdown(self.drain_timeout).await;
            if !outcome.is_clean() {
                warn!(
                    "Pool '{}' force-cancelled with {} task(s) abandoned.",
                    outcome.pool, outcome.abandoned
                );
            }
            report.pools.push(outcome);
        }

        // 3. Listener and live connections.
        if let Err(e) = self.acceptor.release().await {
            error!("Failed to release network resources: {e}");
            report.stage_errors.push(format!("release: {e}"));
        }

        self.state
            .store(ShutdownState::Stopped as u8, Ordering::Release);
        self.done_tx.send_replace(Some(report.clone()));
        info!(
            "Shutdown complete: {} task(s) abandoned, {} stage error(s).",
            report.abandoned(),
            report.stage_errors.len()
        );
        report
    }

    async fn wait_for_completion(&self) -> ShutdownReport {
        let mut rx = self.done_tx.subscribe();
        match rx.wait_for(|report| report.is_some()).await {
            Ok(report) => report.clone().unwrap_or_default(),
            // The sender lives in `self`, so this cannot happen while we are borrowed.
            Err(_) => ShutdownReport::default(),
        }
    }
}
