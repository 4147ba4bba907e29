//! Client wire protocol: JSON text frames tagged by `type`.
//!
//! Inbound: `join {room}`, `leave`, `broadcast {room?, payload}`.
//! Outbound: `joined {room, left?}`, `left {room}`, `error {code, message}`,
//! and room `message` frames rendered by [`roomcast_core::Message::client_frame`].

use serde::{Deserialize, Serialize};

/// Frame could not be parsed.
pub const INVALID_MESSAGE: &str = "INVALID_MESSAGE";
/// Room key empty or too long.
pub const INVALID_ROOM: &str = "INVALID_ROOM";
/// Operation needs a room but the connection is in none.
pub const NOT_IN_ROOM: &str = "NOT_IN_ROOM";
/// Join rejected.
pub const JOIN_FAILED: &str = "JOIN_FAILED";
/// Publish failed; the message was dropped.
pub const BROADCAST_FAILED: &str = "BROADCAST_FAILED";

/// Client → server command.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientCommand {
    /// Enter `room`, leaving the current room if any.
    Join {
        /// Room key.
        room: String,
    },
    /// Leave the current room.
    Leave,
    /// Publish `payload` to `room`, or to the current room when omitted.
    Broadcast {
        /// Target room.
        #[serde(default)]
        room: Option<String>,
        /// Opaque application payload.
        payload: String,
    },
}

/// Server → client control frame.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerEvent {
    /// Membership confirmed.
    Joined {
        /// Room joined.
        room: String,
        /// Room left to make the switch.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        left: Option<String>,
    },
    /// Left a room.
    Left {
        /// Room left.
        room: String,
    },
    /// A command failed.
    Error {
        /// Machine-readable code.
        code: String,
        /// Human-readable detail.
        message: String,
    },
}

impl ServerEvent {
    /// Error frame.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_owned(),
            message: message.into(),
        }
    }

    /// Serialize to a text frame.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize server event");
            String::new()
        })
    }
}
