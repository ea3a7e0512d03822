// src/core/tasks/flush.rs

//! Periodically flushes every write-behind store, with a final flush on shutdown.

use crate::core::persistence::{FlushStats, Flushable};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub struct FlushTask {
    stores: Vec<Arc<dyn Flushable>>,
    interval: Duration,
}

impl FlushTask {
    pub fn new(stores: Vec<Arc<dyn Flushable>>, interval: Duration) -> Self {
        Self { stores, interval }
    }

    /// Runs one flush over all stores and returns the combined counters.
    pub async fn flush_all(&self) -> FlushStats {
        let mut total = FlushStats::default();
        for store in &self.stores {
            let stats = store.flush_pending().await;
            if stats.requeued > 0 {
                warn!(
                    store = store.name(),
                    "{} entity write(s) failed and will be retried.", stats.requeued
                );
            }
            total.inserted += stats.inserted;
            total.updated += stats.updated;
            total.deleted += stats.deleted;
            total.requeued += stats.requeued;
        }
        total
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        if self.stores.is_empty() {
            info!("No entity stores registered. Flush task will not run.");
            return;
        }

        info!(
            "Write-behind flush task started for {} store(s), interval {:?}.",
            self.stores.len(),
            self.interval
        );
        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let stats = self.flush_all().await;
                    if !stats.is_empty() {
                        debug!(?stats, "Periodic flush finished.");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Flush task received shutdown signal, performing final flush...");
                    let stats = self.flush_all().await;
                    if stats.requeued > 0 {
                        warn!("{} entity write(s) were lost on shutdown.", stats.requeued);
                    }
                    info!("Flush task finished.");
                    return;
                }
            }
        }
    }
}
