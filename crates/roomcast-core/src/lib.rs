//! # roomcast-core
//!
//! Shared vocabulary for the roomcast crates:
//!
//! - **Branded IDs**: [`ConnectionId`], [`InstanceId`]
//! - **Rooms**: [`RoomKey`] and the deterministic `room:{key}` broker channel naming
//! - **Messages**: the immutable [`Message`] envelope and its broker/client encodings
//! - **Errors**: [`CodecError`], [`RoomKeyError`]

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod message;
pub mod room;

pub use errors::{CodecError, RoomKeyError};
pub use ids::{ConnectionId, InstanceId};
pub use message::Message;
pub use room::{RoomKey, CHANNEL_PREFIX, MAX_ROOM_KEY_LEN};
