// src/core/metrics.rs

//! Defines and registers Prometheus metrics for server monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, Histogram, HistogramVec, TextEncoder, register_counter,
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram,
    register_histogram_vec,
};

lazy_static! {
    // --- Connection Gauges and Counters ---
    /// The number of connections currently open.
    pub static ref CONNECTED_CLIENTS: Gauge =
        register_gauge!("gatecore_connected_clients", "Number of currently open connections.").unwrap();
    /// Accepted connections, labeled by the sniffed transport.
    pub static ref CONNECTIONS_RECEIVED_TOTAL: CounterVec =
        register_counter_vec!("gatecore_connections_received_total", "Total number of connections accepted, labeled by transport.", &["transport"]).unwrap();
    /// Connections closed because of a read or all idle timeout.
    pub static ref IDLE_DISCONNECTS_TOTAL: Counter =
        register_counter!("gatecore_idle_disconnects_total", "Total number of connections closed for inactivity.").unwrap();
    /// Connections closed because of an undecodable frame.
    pub static ref DECODE_FAILURES_TOTAL: Counter =
        register_counter!("gatecore_decode_failures_total", "Total number of connections closed by a frame decode error.").unwrap();

    // --- Frame Counters ---
    pub static ref FRAMES_RECEIVED_TOTAL: Counter =
        register_counter!("gatecore_frames_received_total", "Total number of frames decoded.").unwrap();
    pub static ref FRAMES_SENT_TOTAL: Counter =
        register_counter!("gatecore_frames_sent_total", "Total number of frames queued for sending.").unwrap();
    /// Frames answered with an error reply instead of reaching a handler.
    pub static ref DISPATCH_REJECTED_TOTAL: CounterVec =
        register_counter_vec!("gatecore_dispatch_rejected_total", "Total number of frames rejected at dispatch, labeled by error code.", &["code"]).unwrap();

    // --- Handler and Pool Metrics ---
    /// Handler runs that returned an error or panicked.
    pub static ref HANDLER_FAILURES_TOTAL: CounterVec =
        register_counter_vec!("gatecore_handler_failures_total", "Total number of failed handler runs, labeled by kind.", &["kind"]).unwrap();
    pub static ref HANDLER_LATENCY_SECONDS: HistogramVec =
        register_histogram_vec!("gatecore_handler_latency_seconds", "Latency of handler execution in seconds.", &["pool"]).unwrap();
    /// Tasks queued or running per pool.
    pub static ref POOL_PENDING_TASKS: GaugeVec =
        register_gauge_vec!("gatecore_pool_pending_tasks", "Tasks queued or running, per pool.", &["pool"]).unwrap();
    /// Submissions executed inline because the pool queue was full.
    pub static ref POOL_CALLER_RUNS_TOTAL: CounterVec =
        register_counter_vec!("gatecore_pool_caller_runs_total", "Total number of tasks run on the submitter because the queue was full.", &["pool"]).unwrap();
    pub static ref POOL_ABANDONED_TASKS_TOTAL: CounterVec =
        register_counter_vec!("gatecore_pool_abandoned_tasks_total", "Total number of tasks cancelled after the drain timeout.", &["pool"]).unwrap();

    // --- Sessions ---
    pub static ref ONLINE_PLAYERS: Gauge =
        register_gauge!("gatecore_online_players", "Number of players bound to a connection.").unwrap();
    pub static ref HEARTBEAT_TIMEOUTS_TOTAL: Counter =
        register_counter!("gatecore_heartbeat_timeouts_total", "Total number of players disconnected for missing heartbeats.").unwrap();

    // --- Persistence ---
    pub static ref ENTITY_FLUSH_FAILURES_TOTAL: Counter =
        register_counter!("gatecore_entity_flush_failures_total", "Total number of entity writes that failed and were re-queued.").unwrap();
    pub static ref ENTITY_FLUSH_SECONDS: Histogram =
        register_histogram!("gatecore_entity_flush_seconds", "Duration of write-behind flushes in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# failed to encode metrics: {e}\n"))
}
