//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file
//! - Environment variables (`AVB_BRIDGE_*`, nested keys separated by `__`)
//! - Command line arguments (see `main.rs`)

use anyhow::{Context, Result};
use avb_bridge_core::BridgeConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Files searched by [`Config::load`], in order.
const CONFIG_PATHS: [&str; 3] = [
    "avb-bridge.toml",
    "/etc/avb-bridge/avb-bridge.toml",
    "~/.config/avb-bridge/avb-bridge.toml",
];

/// Prefix for environment overrides.
const ENV_PREFIX: &str = "AVB_BRIDGE";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Datastore configuration.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Per-connection bridge configuration.
    #[serde(default)]
    pub bridge: BridgeSettings,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Datastore configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the AVB device's web API.
    #[serde(default = "default_upstream_url")]
    pub url: String,

    /// Timeout for update PATCHes in milliseconds. Long-polls have none.
    #[serde(default = "default_update_timeout")]
    pub update_timeout_ms: u64,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Maximum inbound websocket message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// How long to wait for a poll task after disconnect, in milliseconds.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,

    /// Send `{"error": ...}` messages to clients whose updates fail.
    #[serde(default)]
    pub report_update_failures: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive. `RUST_LOG` takes precedence.
    #[serde(default)]
    pub filter: Option<String>,

    /// Also write logs, without colours, to this file.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8889
}

fn default_upstream_url() -> String {
    "http://localhost:8888".to_string()
}

fn default_update_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_shutdown_grace() -> u64 {
    2_000 // 2 seconds
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            upstream: UpstreamConfig::default(),
            transport: TransportConfig::default(),
            bridge: BridgeSettings::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            update_timeout_ms: default_update_timeout(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: default_shutdown_grace(),
            report_update_failures: false,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first default file found, with
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let found = CONFIG_PATHS
            .iter()
            .map(|path| shellexpand::tilde(path).into_owned())
            .find(|path| Path::new(path).exists());

        Self::layered(found.as_deref().map(Path::new))
    }

    /// Load configuration from `path`, with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or cannot be parsed.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        Self::layered(Some(path.as_ref()))
    }

    fn layered(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            let name = path.to_string_lossy();
            builder = builder
                .add_source(config::File::new(&name, config::FileFormat::Toml).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?;

        settings
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address: {}:{}", self.host, self.port))
    }

    /// Settings handed to every connection's bridge.
    #[must_use]
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            shutdown_grace: Duration::from_millis(self.bridge.shutdown_grace_ms),
            report_update_failures: self.bridge.report_update_failures,
        }
    }

    /// Timeout applied to update PATCHes.
    #[must_use]
    pub fn update_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream.update_timeout_ms)
    }
}
