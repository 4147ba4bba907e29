//! WebSocket session handling.

pub mod handler;
pub mod heartbeat;
pub mod session;
