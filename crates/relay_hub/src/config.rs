//! Hub configuration types and defaults.
//!
//! This module contains the configuration structure handed to
//! [`RelayServer`](crate::RelayServer) at construction time. All values are
//! externally supplied constants; the binary crate fills them from TOML and CLI.

use std::net::SocketAddr;
use std::time::Duration;

/// Default backend endpoint, matching the aggregation service's ingest route.
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:5000/api/esp32/data";

/// Configuration structure for the relay hub.
///
/// Contains the network settings for the WebSocket listener, the relay queue
/// and reaper tuning, and the backend sink address.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// The socket address to bind the WebSocket listener to
    pub bind_address: SocketAddr,

    /// Request path accepted for the WebSocket handshake
    pub ws_path: String,

    /// Maximum number of concurrent connections allowed
    pub max_connections: usize,

    /// How long an accepted TCP connection may take to complete the upgrade
    pub handshake_timeout: Duration,

    /// Capacity of the outbound relay queue
    pub queue_capacity: usize,

    /// Interval shared by the forwarder tick and the reaper sweep
    pub tick_interval: Duration,

    /// How long a disconnected session is retained before removal
    pub grace_period: Duration,

    /// Backend sink settings
    pub backend: BackendConfig,
}

/// Settings for the HTTP backend sink.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Whether events are forwarded at all
    pub enabled: bool,

    /// Full URL envelopes are POSTed to
    pub url: String,

    /// Upper bound on a single delivery attempt; must be shorter than the tick
    pub timeout: Duration,

    /// How long the link is considered down after a transport failure
    pub link_cooldown: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            ws_path: "/ws".to_string(),
            max_connections: 1000,
            handshake_timeout: Duration::from_secs(10),
            queue_capacity: 10,
            tick_interval: Duration::from_millis(250),
            grace_period: Duration::from_secs(60),
            backend: BackendConfig::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: DEFAULT_BACKEND_URL.to_string(),
            timeout: Duration::from_millis(200),
            link_cooldown: Duration::from_secs(5),
        }
    }
}
