// src/server/spawner.rs

//! Spawns all of the server's long-running background tasks.

use super::context::ServerContext;
use super::metrics_server;
use crate::core::tasks::FlushTask;
use anyhow::Result;
use std::time::Duration;
use tracing::info;

/// Spawns all background tasks into the context's JoinSet.
pub fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let config = ctx.config.clone();
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;

    // --- Metrics Server ---
    if config.metrics.enabled {
        let port = config.metrics.port;
        let shutdown_rx_metrics = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            metrics_server::run_metrics_server(port, shutdown_rx_metrics).await
        });
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    // --- Heartbeat Sweeper ---
    let heartbeat = ctx.heartbeat.clone();
    let shutdown_rx_heartbeat = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        heartbeat.run(shutdown_rx_heartbeat).await;
        Ok(())
    });

    // --- Write-behind Flush ---
    let flush_task = FlushTask::new(
        ctx.stores.clone(),
        Duration::from_secs(config.persistence.flush_interval_secs.max(1)),
    );
    let shutdown_rx_flush = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        flush_task.run(shutdown_rx_flush).await;
        Ok(())
    });

    info!("All background tasks have been spawned.");
    Ok(())
}
