//! # roomcast-broker
//!
//! The pub/sub broker as seen by the roomcast backplane.
//!
//! - [`Broker`] / [`BrokerLink`] / [`Inbox`]: the narrow collaborator interface
//!   (`connect`, `publish`, `subscribe`, `unsubscribe`, `next_message`)
//! - [`MemoryBroker`]: in-process broker shared by several hubs, with fault
//!   injection for reconnect testing
//! - [`TcpBroker`] / [`BrokerServer`]: a small standalone broker speaking
//!   length-delimited frames over TCP
//!
//! Delivery is at-least-once inside one connected session and nothing crosses
//! a disconnect: when a session ends its [`Inbox`] reports
//! [`BrokerError::Disconnected`] and the link refuses further operations.

#![deny(unsafe_code)]

pub mod error;
pub mod frame;
pub mod memory;
pub mod server;
pub mod session;
pub mod tcp;

pub use error::BrokerError;
pub use frame::{Frame, FrameError};
pub use memory::{BrokerStats, MemoryBroker};
pub use server::BrokerServer;
pub use session::{Broker, BrokerLink, BrokerSession, Delivery, Inbox};
pub use tcp::TcpBroker;
