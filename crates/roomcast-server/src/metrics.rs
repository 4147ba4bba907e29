//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Call once at startup, before anything records.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// WebSocket connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Upgrades refused at the connection limit (counter).
pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";
/// Room joins (counter).
pub const ROOM_JOINS_TOTAL: &str = "room_joins_total";
/// Room leaves (counter).
pub const ROOM_LEAVES_TOTAL: &str = "room_leaves_total";
/// Broadcasts published (counter).
pub const BROADCASTS_TOTAL: &str = "broadcasts_total";
/// Broadcasts dropped because publishing failed (counter, labels: error_kind).
pub const BROADCAST_FAILURES_TOTAL: &str = "broadcast_failures_total";
/// Clients closed for missing pongs (counter).
pub const HEARTBEAT_TIMEOUTS_TOTAL: &str = "heartbeat_timeouts_total";
/// Broker link listening (gauge). 1 = up, 0 = down.
pub const BROKER_LINK_UP: &str = "broker_link_up";
