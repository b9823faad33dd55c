//! Configuration management for the telemetry relay.
//!
//! This module handles loading, validation, and conversion of relay
//! configuration from TOML files and command-line arguments.

use anyhow::Context;
use relay_hub::{BackendConfig, HubConfig, DEFAULT_BACKEND_URL};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Application configuration loaded from TOML file.
///
/// Every section may be omitted from the file; missing sections and fields
/// take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// WebSocket listener settings
    pub server: ServerSettings,
    /// Queue, tick and grace period tuning
    pub relay: RelaySettings,
    /// Aggregation backend settings
    pub backend: BackendSettings,
    /// Logging configuration settings
    pub logging: LoggingSettings,
}

/// Network binding and connection limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Network address to bind the listener to (e.g., "0.0.0.0:8080")
    pub bind_address: String,
    /// Request path devices must use for the WebSocket upgrade
    pub ws_path: String,
    /// Maximum number of concurrent device connections
    pub max_connections: usize,
    /// Time allowed for the WebSocket upgrade, in milliseconds
    pub handshake_timeout_ms: u64,
}

/// Timing and capacity of the relay pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Outbound queue capacity; newest events are dropped when full
    pub queue_capacity: usize,
    /// Forwarder and reaper tick in milliseconds
    pub tick_interval_ms: u64,
    /// How long a disconnected session is kept, in milliseconds
    pub grace_period_ms: u64,
}

/// HTTP backend the forwarder POSTs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Whether to forward at all
    pub enabled: bool,
    /// Ingest endpoint
    pub url: String,
    /// Per-delivery timeout in milliseconds; must be below the tick interval
    pub timeout_ms: u64,
    /// Pause after a transport failure, in milliseconds
    pub link_cooldown_ms: u64,
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            ws_path: "/ws".to_string(),
            max_connections: 1000,
            handshake_timeout_ms: 10_000,
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            tick_interval_ms: 250,
            grace_period_ms: 60_000,
        }
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            url: DEFAULT_BACKEND_URL.to_string(),
            timeout_ms: 200,
            link_cooldown_ms: 5_000,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the
    /// specified path and returns the default configuration.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config: AppConfig =
                toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Converts the file configuration into the hub's runtime configuration.
    pub fn to_hub_config(&self) -> anyhow::Result<HubConfig> {
        let bind_address: SocketAddr = self
            .server
            .bind_address
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.server.bind_address))?;

        Ok(HubConfig {
            bind_address,
            ws_path: self.server.ws_path.clone(),
            max_connections: self.server.max_connections,
            handshake_timeout: Duration::from_millis(self.server.handshake_timeout_ms),
            queue_capacity: self.relay.queue_capacity,
            tick_interval: Duration::from_millis(self.relay.tick_interval_ms),
            grace_period: Duration::from_millis(self.relay.grace_period_ms),
            backend: BackendConfig {
                enabled: self.backend.enabled,
                url: self.backend.url.clone(),
                timeout: Duration::from_millis(self.backend.timeout_ms),
                link_cooldown: Duration::from_millis(self.backend.link_cooldown_ms),
            },
        })
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", &self.server.bind_address));
        }

        if !self.server.ws_path.starts_with('/') {
            return Err(format!("WebSocket path must start with '/': {}", &self.server.ws_path));
        }

        if self.server.max_connections == 0 {
            return Err("max_connections must be greater than 0".to_string());
        }

        if self.server.handshake_timeout_ms == 0 {
            return Err("handshake_timeout_ms must be greater than 0".to_string());
        }

        if self.relay.queue_capacity == 0 {
            return Err("queue_capacity must be greater than 0".to_string());
        }

        if self.relay.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be greater than 0".to_string());
        }

        // A delivery that outlives its tick would delay the next one.
        if self.backend.timeout_ms == 0 || self.backend.timeout_ms >= self.relay.tick_interval_ms {
            return Err(format!(
                "backend timeout_ms ({}) must be between 1 and tick_interval_ms ({}) exclusive",
                self.backend.timeout_ms, self.relay.tick_interval_ms
            ));
        }

        if self.backend.enabled {
            match reqwest::Url::parse(&self.backend.url) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => return Err(format!("Unsupported backend URL scheme: {}", url.scheme())),
                Err(e) => return Err(format!("Invalid backend URL {}: {}", &self.backend.url, e)),
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
