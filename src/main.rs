// src/main.rs

//! The main entry point for the SpinelGate gateway.

use anyhow::Result;
use spinelgate::config::Config;
use spinelgate::server;
use std::env;
use std::path::Path;
use tracing::{error, info, warn};
use tracing_subscriber::{filter::EnvFilter, prelude::*};

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("SpinelGate version {VERSION}");
        return Ok(());
    }

    // The config path can be provided via --config; otherwise it defaults to "spinelgate.toml".
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("spinelgate.toml");

    // A missing default file means built-in defaults. An explicit path must exist.
    let explicit = args.iter().any(|arg| arg == "--config");
    let (config, used_defaults) = if !explicit && !Path::new(config_path).exists() {
        (Config::default(), true)
    } else {
        match Config::from_file(config_path) {
            Ok(cfg) => (cfg, false),
            Err(e) => {
                eprintln!("Failed to load configuration from \"{config_path}\": {e:#}");
                std::process::exit(1);
            }
        }
    };

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_level))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(true),
        )
        .init();

    if used_defaults {
        warn!("No '{}' found; running with default configuration.", config_path);
    }
    info!("Starting SpinelGate {}", VERSION);

    if let Err(e) = server::run(config).await {
        error!("Gateway runtime error: {}", e);
        return Err(e);
    }
    Ok(())
}
