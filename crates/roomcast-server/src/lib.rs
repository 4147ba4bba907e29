//! # roomcast-server
//!
//! Axum gateway for roomcast. Clients connect to `/ws`, join one room at a
//! time and broadcast JSON text frames; the [`roomcast_hub::Coordinator`]
//! relays them across instances through the broker.
//!
//! - `GET /ws[?room=KEY]`: WebSocket upgrade, optionally joining `KEY`
//! - `GET /health`: `ok` while the broker link is listening, else `degraded` (503)
//! - `GET /metrics`: Prometheus text, when a recorder is installed

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::{hub_config, ServerConfig};
pub use health::HealthResponse;
pub use protocol::{ClientCommand, ServerEvent};
pub use server::{AppState, RelayServer};
pub use shutdown::ShutdownCoordinator;
