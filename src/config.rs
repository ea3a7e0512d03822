// src/config.rs

//! Manages server configuration: loading, applying defaults, and validation.

use crate::connection::IdleSettings;
use crate::core::protocol::DEFAULT_MAX_FRAME_SIZE;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use strum_macros::Display;
use tracing::{info, warn};

/// What happens when a handler that needs a bound player runs on an anonymous connection.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UnboundSessionPolicy {
    /// Log a warning and drop the message without replying.
    #[default]
    Drop,
    /// Log a warning and answer with a `NO_SESSION` error reply.
    Reject,
    /// Log a warning and close the connection.
    Disconnect,
}

/// Idle detection thresholds in seconds. `0` disables a check.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IdleConfig {
    #[serde(default = "default_read_idle_secs")]
    pub read_secs: u64,
    #[serde(default = "default_write_idle_secs")]
    pub write_secs: u64,
    #[serde(default = "default_all_idle_secs")]
    pub all_secs: u64,
}

fn default_read_idle_secs() -> u64 {
    60
}
fn default_write_idle_secs() -> u64 {
    120
}
fn default_all_idle_secs() -> u64 {
    180
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            read_secs: default_read_idle_secs(),
            write_secs: default_write_idle_secs(),
            all_secs: default_all_idle_secs(),
        }
    }
}

impl IdleConfig {
    pub fn to_settings(&self) -> IdleSettings {
        let to_duration = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));
        IdleSettings {
            read: to_duration(self.read_secs),
            write: to_duration(self.write_secs),
            all: to_duration(self.all_secs),
        }
    }
}

/// Sizing of one worker pool.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker tasks, each on the pool's own runtime.
    pub size: usize,
    /// Bound of the task queue before submissions run on the caller.
    pub queue_capacity: usize,
}

impl PoolConfig {
    pub fn player_default() -> Self {
        Self {
            size: num_cpus::get().max(1),
            queue_capacity: 1000,
        }
    }

    pub fn system_default() -> Self {
        Self {
            size: 2,
            queue_capacity: 500,
        }
    }
}

/// Both traffic-class pools.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PoolsConfig {
    #[serde(default = "PoolConfig::player_default")]
    pub player: PoolConfig,
    #[serde(default = "PoolConfig::system_default")]
    pub system: PoolConfig,
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            player: PoolConfig::player_default(),
            system: PoolConfig::system_default(),
        }
    }
}

/// Heartbeat tracking of bound players.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// A player that has not sent a heartbeat for this long is disconnected. `0` disables.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_heartbeat_sweep")]
    pub sweep_interval_secs: u64,
}

fn default_heartbeat_timeout() -> u64 {
    120
}
fn default_heartbeat_sweep() -> u64 {
    30
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_heartbeat_timeout(),
            sweep_interval_secs: default_heartbeat_sweep(),
        }
    }
}

/// Write-behind flush settings for entity caches.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PersistenceConfig {
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_flush_interval() -> u64 {
    60
}
fn default_batch_size() -> usize {
    100
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: default_flush_interval(),
            batch_size: default_batch_size(),
        }
    }
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9898
}

/// A raw representation of the config file before validation.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_max_connections")]
    max_connections: usize,
    #[serde(default)]
    io_threads: Option<usize>,
    #[serde(default = "default_max_frame_size")]
    max_frame_size: usize,
    #[serde(default = "default_websocket_path")]
    websocket_path: String,
    #[serde(default = "default_write_queue_capacity")]
    write_queue_capacity: usize,
    #[serde(default)]
    unbound_session_policy: UnboundSessionPolicy,
    #[serde(default = "default_drain_timeout")]
    shutdown_drain_timeout_secs: u64,
    #[serde(default)]
    machine_id: u16,
    #[serde(default)]
    idle: IdleConfig,
    #[serde(default)]
    pools: PoolsConfig,
    #[serde(default)]
    heartbeat: HeartbeatConfig,
    #[serde(default)]
    persistence: PersistenceConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    9527
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_connections() -> usize {
    10000
}
fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}
fn default_websocket_path() -> String {
    "/ws".to_string()
}
fn default_write_queue_capacity() -> usize {
    1024
}
fn default_drain_timeout() -> u64 {
    30
}

/// Represents the final, validated server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    /// `0` binds an ephemeral port.
    pub port: u16,
    pub log_level: String,
    pub max_connections: usize,
    /// Worker threads of the I/O runtime. `None` means one per CPU.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub io_threads: Option<usize>,
    /// Upper bound for the `length` field of a frame.
    pub max_frame_size: usize,
    pub websocket_path: String,
    /// Outbound frames buffered per connection before the peer counts as too slow.
    pub write_queue_capacity: usize,
    pub unbound_session_policy: UnboundSessionPolicy,
    pub shutdown_drain_timeout_secs: u64,
    /// Node identifier embedded in generated ids (13 bits).
    pub machine_id: u16,
    pub idle: IdleConfig,
    pub pools: PoolsConfig,
    pub heartbeat: HeartbeatConfig,
    pub persistence: PersistenceConfig,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::from(RawConfig::empty())
    }
}

impl RawConfig {
    fn empty() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            max_connections: default_max_connections(),
            io_threads: None,
            max_frame_size: default_max_frame_size(),
            websocket_path: default_websocket_path(),
            write_queue_capacity: default_write_queue_capacity(),
            unbound_session_policy: UnboundSessionPolicy::default(),
            shutdown_drain_timeout_secs: default_drain_timeout(),
            machine_id: 0,
            idle: IdleConfig::default(),
            pools: PoolsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            persistence: PersistenceConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl From<RawConfig> for Config {
    fn from(raw: RawConfig) -> Self {
        Config {
            host: raw.host,
            port: raw.port,
            log_level: raw.log_level,
            max_connections: raw.max_connections,
            io_threads: raw.io_threads,
            max_frame_size: raw.max_frame_size,
            websocket_path: raw.websocket_path,
            write_queue_capacity: raw.write_queue_capacity,
            unbound_session_policy: raw.unbound_session_policy,
            shutdown_drain_timeout_secs: raw.shutdown_drain_timeout_secs,
            machine_id: raw.machine_id,
            idle: raw.idle,
            pools: raw.pools,
            heartbeat: raw.heartbeat,
            persistence: raw.persistence,
            metrics: raw.metrics,
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{}'", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Invalid configuration in '{}'", path.display()))
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw_config: RawConfig =
            toml::from_str(contents).context("Failed to parse TOML configuration")?;
        let config = Config::from(raw_config);
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`. When the file is absent and was not named explicitly, the built-in
    /// defaults are used instead.
    pub fn load(path: &str, explicit: bool) -> Result<Self> {
        if !explicit && !Path::new(path).exists() {
            info!(
                "No configuration file at '{}', using built-in defaults.",
                path
            );
            let config = Config::default();
            config.validate()?;
            return Ok(config);
        }
        Self::from_file(path)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_drain_timeout_secs)
    }

    /// Worker threads for the I/O runtime.
    pub fn io_threads(&self) -> usize {
        self.io_threads.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Validates the configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.max_connections == 0 {
            return Err(anyhow!("max_connections cannot be 0"));
        }
        if self.io_threads == Some(0) {
            return Err(anyhow!("io_threads cannot be 0"));
        }
        if self.max_frame_size < crate::core::protocol::frame::FRAME_OVERHEAD
            || self.max_frame_size > u32::MAX as usize
        {
            return Err(anyhow!(
                "max_frame_size must be between {} and {}",
                crate::core::protocol::frame::FRAME_OVERHEAD,
                u32::MAX
            ));
        }
        if !self.websocket_path.starts_with('/') {
            return Err(anyhow!("websocket_path must start with '/'"));
        }
        if self.write_queue_capacity == 0 {
            return Err(anyhow!("write_queue_capacity cannot be 0"));
        }
        if self.shutdown_drain_timeout_secs == 0 {
            warn!("shutdown_drain_timeout_secs is 0: in-flight handlers will be abandoned on shutdown.");
        }
        if self.machine_id >= (1 << crate::core::id_generator::MACHINE_ID_BITS) {
            return Err(anyhow!(
                "machine_id must be below {}",
                1u32 << crate::core::id_generator::MACHINE_ID_BITS
            ));
        }

        for (name, pool) in [("player", &self.pools.player), ("system", &self.pools.system)] {
            if pool.size == 0 {
                return Err(anyhow!("pools.{name}.size cannot be 0"));
            }
            if pool.queue_capacity == 0 {
                return Err(anyhow!("pools.{name}.queue_capacity cannot be 0"));
            }
        }

        if self.heartbeat.timeout_secs > 0 && self.heartbeat.sweep_interval_secs == 0 {
            return Err(anyhow!(
                "heartbeat.sweep_interval_secs cannot be 0 when heartbeat.timeout_secs is set"
            ));
        }
        if self.persistence.flush_interval_secs == 0 {
            return Err(anyhow!("persistence.flush_interval_secs cannot be 0"));
        }
        if self.persistence.batch_size == 0 {
            return Err(anyhow!("persistence.batch_size cannot be 0"));
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.port {
                return Err(anyhow!(
                    "metrics.port cannot be the same as the main server port"
                ));
            }
        }
        Ok(())
    }
}
