//! # AVB Bridge Server
//!
//! Exposes a MOTU AVB datastore's long-polling HTTP API as websockets.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! avb-bridge
//!
//! # Point at a device
//! avb-bridge --upstream http://192.168.1.20
//!
//! # Run with custom config
//! avb-bridge --config /path/to/avb-bridge.toml
//!
//! # Run with environment variables
//! AVB_BRIDGE_PORT=8080 AVB_BRIDGE_UPSTREAM__URL=http://192.168.1.20 avb-bridge
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "avb_bridge=debug,avb_bridge_core=debug,tower_http=info";

/// WebSocket bridge for MOTU AVB datastores.
#[derive(Debug, Parser)]
#[command(name = "avb-bridge", version, about)]
struct Cli {
    /// Configuration file. Defaults to the first of the standard locations.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base URL of the AVB device.
    #[arg(short, long)]
    upstream: Option<String>,

    /// Host to bind to.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on.
    #[arg(short, long)]
    port: Option<u16>,
}

impl Cli {
    fn apply(self, config: &mut config::Config) {
        if let Some(url) = self.upstream {
            config.upstream.url = url;
        }
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => config::Config::load_from(path)?,
        None => config::Config::load()?,
    };
    cli.apply(&mut config);

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        config
            .logging
            .filter
            .as_deref()
            .unwrap_or(DEFAULT_FILTER)
            .into()
    });
    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    tracing::info!(
        "Starting AVB bridge on {}:{} for {}",
        config.host,
        config.port,
        config.upstream.url
    );

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
