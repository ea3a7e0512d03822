// src/main.rs

//! The main entry point for the gatecore game server.

use anyhow::{Context, Result};
use gatecore::config::Config;
use gatecore::server;
use std::env;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("gatecore version {VERSION}");
        return Ok(());
    }

    // Logging comes up before the config so that loading problems are visible. The
    // filter is reloaded with the configured level once the config is known.
    let rust_log = env::var("RUST_LOG").ok();
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(
        rust_log.clone().unwrap_or_else(|| "info".to_string()),
    ));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact() // Use the compact, single-line format.
                .with_ansi(true), // Enable ANSI color codes for log levels.
        )
        .init();

    // The configuration path can be given with --config; otherwise "config.toml" is used
    // if it exists.
    let explicit_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());
    let config_path = explicit_path.unwrap_or("config.toml");

    let mut config = match Config::load(config_path, explicit_path.is_some()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e:#}");
            std::process::exit(1);
        }
    };

    // Override port if provided as a command-line argument
    if let Some(port_index) = args.iter().position(|arg| arg == "--port") {
        if let Some(port_str) = args.get(port_index + 1) {
            match port_str.parse::<u16>() {
                Ok(port) => config.port = port,
                Err(_) => {
                    eprintln!("Invalid port number: {port_str}");
                    std::process::exit(1);
                }
            }
        } else {
            eprintln!("--port flag requires a value");
            std::process::exit(1);
        }
    }

    if rust_log.is_none()
        && let Err(e) = reload_handle.reload(EnvFilter::new(&config.log_level))
    {
        eprintln!("Failed to apply log level '{}': {e}", config.log_level);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.io_threads())
        .thread_name("io-worker")
        .enable_all()
        .build()
        .context("Failed to build the I/O runtime")?;
    info!("I/O runtime started with {} worker thread(s).", config.io_threads());

    runtime.block_on(async {
        if let Err(e) = server::run(config).await {
            error!("Server runtime error: {:#}", e);
            return Err(e);
        }
        Ok(())
    })
}
