//! MavBridge daemon
//!
//! Opens the configured vehicle link and runs the engine on it until
//! interrupted.

mod config;
mod link;

use anyhow::Context;
use clap::Parser;
use mavbridge_core::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{DaemonConfig, LinkKind};

const DEFAULT_CONFIG_PATH: &str = "config.json";

#[derive(Parser, Debug)]
#[command(name = "mavbridge", version, about = "MAVLink vehicle link daemon")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let loaded = DaemonConfig::load(&args.config)?;
    let config = loaded.clone().unwrap_or_default();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    if loaded.is_none() {
        warn!(path = %args.config.display(), "Config file not found, using defaults");
    }
    info!(version = mavbridge_core::VERSION, "MavBridge starting");

    let registry = match &config.schema {
        Some(schema) => SchemaRegistry::from_file(schema)
            .with_context(|| format!("Failed to load dialect {}", schema.display()))?,
        None => SchemaRegistry::builtin()?,
    };
    info!(kinds = registry.len(), "Schema loaded");
    let codec = Arc::new(Codec::new(Arc::new(registry)));

    // Open the link before starting the engine so a bad address aborts startup
    let (engine, mut link_task) = match config.link()? {
        LinkKind::Udp(addr) => {
            let (socket, remote) = link::open_udp(&addr, config.remote.as_deref()).await?;
            let (engine, outbound) = VehicleEngine::start(codec, config.engine.clone());
            (engine.clone(), tokio::spawn(link::run_udp(engine, outbound, socket, remote)))
        }
        LinkKind::Serial(device) => {
            let stream = link::open_serial(&device, config.baud)?;
            info!(device, baud = config.baud, "Serial link open");
            let (engine, outbound) = VehicleEngine::start(codec, config.engine.clone());
            (engine.clone(), tokio::spawn(link::run_serial(engine, outbound, stream)))
        }
    };

    tokio::select! {
        _ = shutdown_signal() => info!("Shutdown requested"),
        result = &mut link_task => match result {
            Ok(Ok(())) => info!("Link task finished"),
            Ok(Err(e)) => warn!("Link failed: {:#}", e),
            Err(e) => warn!("Link task panicked: {}", e),
        },
    }

    engine.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        tokio::select! {
            _ = ctrl_c() => {},
            _ = terminate() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
    }
}

async fn ctrl_c() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(?err, "Failed to install Ctrl+C handler");
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(err) => warn!(?err, "Failed to install SIGTERM handler"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_path_defaults() {
        let args = Args::try_parse_from(["mavbridge"]).unwrap();
        assert_eq!(args.config, PathBuf::from("config.json"));
    }

    #[test]
    fn test_config_path_positional() {
        let args = Args::try_parse_from(["mavbridge", "/etc/mavbridge/drone.json"]).unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/mavbridge/drone.json"));
        assert!(Args::try_parse_from(["mavbridge", "a.json", "b.json"]).is_err());
    }
}
