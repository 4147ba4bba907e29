//! `/health` endpoint body.

use std::time::Instant;

use roomcast_hub::LinkState;
use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while the broker link is listening, `"degraded"` otherwise.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open WebSocket connections.
    pub connections: usize,
    /// Rooms with at least one local member.
    pub rooms: usize,
    /// Broker link state.
    pub link: &'static str,
    /// Broker implementation name.
    pub broker: String,
}

impl HealthResponse {
    /// Whether the instance can take part in cross-instance broadcast.
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    rooms: usize,
    link: LinkState,
    broker: &str,
) -> HealthResponse {
    HealthResponse {
        status: if link == LinkState::Listening {
            "ok"
        } else {
            "degraded"
        },
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        rooms,
        link: link.as_str(),
        broker: broker.to_owned(),
    }
}
