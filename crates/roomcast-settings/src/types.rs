//! Settings types and their compiled defaults.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomcastSettings {
    /// WebSocket gateway.
    pub server: ServerSettings,
    /// Registry, fan-out and supervisor timing.
    pub hub: HubSettings,
    /// Which broker the backplane uses.
    pub broker: BrokerSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl RoomcastSettings {
    /// Check ranges and cross-field consistency.
    pub fn validate(&self) -> Result<()> {
        let s = &self.server;
        if s.max_connections == 0 {
            return Err(invalid("server.maxConnections must be at least 1"));
        }
        if s.send_queue == 0 {
            return Err(invalid("server.sendQueue must be at least 1"));
        }
        if s.heartbeat_interval_ms == 0 {
            return Err(invalid("server.heartbeatIntervalMs must be positive"));
        }
        if s.heartbeat_timeout_ms < s.heartbeat_interval_ms {
            return Err(invalid(
                "server.heartbeatTimeoutMs must not be shorter than heartbeatIntervalMs",
            ));
        }
        let h = &self.hub;
        if !(0.0..=1.0).contains(&h.jitter) {
            return Err(invalid("hub.jitter must be within 0..=1"));
        }
        if h.reconnect_base_ms == 0 || h.reconnect_max_ms < h.reconnect_base_ms {
            return Err(invalid(
                "hub.reconnectBaseMs must be positive and not above reconnectMaxMs",
            ));
        }
        if h.send_timeout_ms == 0 || h.sweep_interval_ms == 0 {
            return Err(invalid("hub timeouts must be positive"));
        }
        if self.broker.kind == BrokerKind::Tcp && self.broker.address.trim().is_empty() {
            return Err(invalid("broker.address is required for the tcp broker"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> SettingsError {
    SettingsError::InvalidValue(msg.to_owned())
}

/// WebSocket gateway settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port. `0` picks a free port.
    pub port: u16,
    /// Concurrent WebSocket connections accepted before refusing.
    pub max_connections: usize,
    /// Ping interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// A client silent for this long is disconnected.
    pub heartbeat_timeout_ms: u64,
    /// Largest inbound WebSocket message, in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per connection.
    pub send_queue: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_connections: 10_000,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 60_000,
            max_message_size: 64 * 1024,
            send_queue: 256,
        }
    }
}

/// Hub timing settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Bound on one member send during fan-out.
    pub send_timeout_ms: u64,
    /// Dead connection sweep period.
    pub sweep_interval_ms: u64,
    /// First broker reconnect delay.
    pub reconnect_base_ms: u64,
    /// Broker reconnect delay cap.
    pub reconnect_max_ms: u64,
    /// Relative reconnect jitter.
    pub jitter: f64,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            send_timeout_ms: 2_000,
            sweep_interval_ms: 30_000,
            reconnect_base_ms: 250,
            reconnect_max_ms: 30_000,
            jitter: 0.2,
        }
    }
}

/// Broker implementation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    /// In-process broker. Only useful for a single instance.
    #[default]
    Memory,
    /// Standalone `roomcast broker` reached over TCP.
    Tcp,
}

impl fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::Tcp => "tcp",
        })
    }
}

impl FromStr for BrokerKind {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "tcp" => Ok(Self::Tcp),
            other => Err(SettingsError::InvalidValue(format!(
                "unknown broker kind '{other}'"
            ))),
        }
    }
}

/// Broker settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerSettings {
    /// Broker implementation.
    pub kind: BrokerKind,
    /// `host:port` of the TCP broker.
    pub address: String,
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            kind: BrokerKind::Memory,
            address: "127.0.0.1:7400".to_string(),
            connect_timeout_ms: 5_000,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive. `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = RoomcastSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.broker.kind, BrokerKind::Memory);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(RoomcastSettings::default()).unwrap();
        assert_eq!(json["server"]["maxConnections"], 10_000);
        assert_eq!(json["hub"]["sendTimeoutMs"], 2_000);
        assert_eq!(json["broker"]["kind"], "memory");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: RoomcastSettings =
            serde_json::from_str(r#"{"broker": {"kind": "tcp"}}"#).unwrap();
        assert_eq!(settings.broker.kind, BrokerKind::Tcp);
        assert_eq!(settings.broker.address, "127.0.0.1:7400");
        assert_eq!(settings.server, ServerSettings::default());
    }

    #[test]
    fn broker_kind_from_str() {
        assert_eq!("TCP".parse::<BrokerKind>().unwrap(), BrokerKind::Tcp);
        assert!("redis".parse::<BrokerKind>().is_err());
    }

    #[test]
    fn validate_rejects_bad_jitter() {
        let mut settings = RoomcastSettings::default();
        settings.hub.jitter = 1.5;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn validate_rejects_short_heartbeat_timeout() {
        let mut settings = RoomcastSettings::default();
        settings.server.heartbeat_timeout_ms = 1_000;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_requires_tcp_address() {
        let mut settings = RoomcastSettings::default();
        settings.broker.kind = BrokerKind::Tcp;
        settings.broker.address = "  ".into();
        assert!(settings.validate().is_err());
    }
}
