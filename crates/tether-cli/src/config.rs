//! CLI configuration.
//!
//! Configuration is layered:
//! - TOML file (`--config`, or the first of the default paths that exists)
//! - Environment variables (`TETHER_*`, nested keys separated by `__`)
//! - Command line flags

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tether_client::{ClientConfig, Endpoint, ReconnectConfig};

const DEFAULT_PATHS: [&str; 3] = [
    "tether.toml",
    "/etc/tether/tether.toml",
    "~/.config/tether/tether.toml",
];

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Gateway URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Bearer token presented after connecting.
    #[serde(default)]
    pub credential: Option<String>,

    /// Topics to listen on when none are given on the command line.
    #[serde(default)]
    pub topics: Vec<String>,

    /// Reconnect behavior.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Serve Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,

    /// Address of the metrics listener.
    #[serde(default = "default_metrics_listen")]
    pub listen: String,
}

fn default_endpoint() -> String {
    "ws://127.0.0.1:8000/".to_string()
}

fn default_metrics_listen() -> String {
    "127.0.0.1:9090".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            credential: None,
            topics: Vec::new(),
            reconnect: ReconnectConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

impl Config {
    /// Load configuration from `path` (or the default paths) and the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::find() {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };

        base.with_env(None)
    }

    /// First default config path that exists.
    fn find() -> Option<PathBuf> {
        DEFAULT_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Overlay `TETHER_*` variables. `vars` replaces the process environment
    /// when given.
    fn with_env(self, vars: Option<HashMap<String, String>>) -> Result<Self> {
        let environment = config::Environment::with_prefix("TETHER")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("topics")
            .source(vars);

        config::Config::builder()
            .add_source(config::Config::try_from(&self)?)
            .add_source(environment)
            .build()
            .context("Failed to read environment overrides")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Parse the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a `ws://` or `wss://` URL.
    pub fn endpoint(&self) -> Result<Endpoint> {
        self.endpoint
            .parse()
            .with_context(|| format!("Invalid endpoint: {}", self.endpoint))
    }

    /// Client configuration derived from this configuration.
    #[must_use]
    pub fn client(&self) -> ClientConfig {
        ClientConfig {
            reconnect: self.reconnect.clone(),
            ..ClientConfig::default()
        }
    }
}

impl MetricsConfig {
    /// Parse the listener address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is not `host:port`.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen
            .parse()
            .with_context(|| format!("Invalid metrics address: {}", self.listen))
    }
}
