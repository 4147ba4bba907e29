//! # roomcast-hub
//!
//! Process-transparent room membership and broadcast.
//!
//! - [`RoomRegistry`]: which local connections are in which room
//! - [`Backplane`]: the broker link, dynamic channel subscription and the
//!   inbound listener
//! - [`Coordinator`]: `join` / `leave` / `switch_room` / `broadcast`, and the
//!   fan-out callback the listener drives
//! - Supervisor ([`SupervisorHandle`]): reconnect with backoff and periodic
//!   sweeping of dead connections
//!
//! A broadcast always goes out through the broker and comes back through the
//! listener, which is the only code that writes to local sockets.

#![deny(unsafe_code)]

pub mod backplane;
pub mod connection;
pub mod coordinator;
pub mod errors;
pub mod registry;
pub mod supervisor;

pub use backplane::{Backplane, DeliveryHandler, LinkState, ListenExit};
pub use connection::Connection;
pub use coordinator::{Coordinator, FanOutReport};
pub use errors::{BackplaneError, HubError, RegistryError, SendError};
pub use registry::{Removal, RoomRegistry};
pub use supervisor::{Backoff, HubConfig, SupervisorHandle};
