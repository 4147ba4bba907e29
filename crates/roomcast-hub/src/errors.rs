//! Hub error types.

use roomcast_broker::BrokerError;
use roomcast_core::{CodecError, ConnectionId, RoomKey};
use thiserror::Error;

/// Registry invariant violation. Fails only the offending operation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The connection is already a member of another room.
    #[error("connection {conn_id} is already in room {current}")]
    AlreadyInRoom {
        /// Offending connection.
        conn_id: ConnectionId,
        /// Room it currently belongs to.
        current: RoomKey,
    },
}

/// Backplane failure.
#[derive(Debug, Error)]
pub enum BackplaneError {
    /// No broker link is established.
    #[error("broker link is down")]
    NotConnected,
    /// The broker rejected the operation.
    #[error(transparent)]
    Broker(#[from] BrokerError),
    /// The message could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl BackplaneError {
    /// Short classification string for logs and metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::Broker(e) => e.error_kind(),
            Self::Codec(_) => "codec",
        }
    }
}

/// Error returned by the coordinator's public operations.
#[derive(Debug, Error)]
pub enum HubError {
    /// Membership change rejected.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Publishing failed; the message was dropped.
    #[error(transparent)]
    Backplane(#[from] BackplaneError),
}

/// Outbound frame could not be handed to a connection's writer.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The socket writer has gone away.
    #[error("connection closed")]
    Closed,
    /// The writer's queue stayed full past the send timeout.
    #[error("send timed out")]
    TimedOut,
    /// The per-connection queue is full.
    #[error("send queue full")]
    Full,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_in_room_display() {
        let err = RegistryError::AlreadyInRoom {
            conn_id: ConnectionId::from_raw("conn_1"),
            current: RoomKey::new("lobby").unwrap(),
        };
        assert_eq!(err.to_string(), "connection conn_1 is already in room lobby");
    }

    #[test]
    fn backplane_error_kinds() {
        assert_eq!(BackplaneError::NotConnected.error_kind(), "not_connected");
        assert_eq!(
            BackplaneError::Broker(BrokerError::Disconnected).error_kind(),
            "disconnected"
        );
    }

    #[test]
    fn hub_error_is_transparent() {
        let err = HubError::from(BackplaneError::NotConnected);
        assert_eq!(err.to_string(), "broker link is down");
    }
}
