//! Gateway configuration.

use std::time::Duration;

use roomcast_hub::HubConfig;
use roomcast_settings::{HubSettings, ServerSettings};
use serde::{Deserialize, Serialize};

/// Configuration for the WebSocket gateway.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Ping interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Close a client that has not answered for this long.
    pub heartbeat_timeout_ms: u64,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per connection.
    pub send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1_000,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            max_message_size: 64 * 1024,
            send_queue: 256,
        }
    }
}

impl ServerConfig {
    /// Gateway config from loaded settings.
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            max_connections: settings.max_connections,
            heartbeat_interval_ms: settings.heartbeat_interval_ms,
            heartbeat_timeout_ms: settings.heartbeat_timeout_ms,
            max_message_size: settings.max_message_size,
            send_queue: settings.send_queue,
        }
    }

    /// Ping interval, never below 1ms.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    /// Silence allowed before a client is closed.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

/// Hub timing from loaded settings.
pub fn hub_config(settings: &HubSettings) -> HubConfig {
    HubConfig {
        send_timeout: Duration::from_millis(settings.send_timeout_ms),
        sweep_interval: Duration::from_millis(settings.sweep_interval_ms),
        reconnect_base: Duration::from_millis(settings.reconnect_base_ms),
        reconnect_max: Duration::from_millis(settings.reconnect_max_ms),
        jitter: settings.jitter,
    }
}
