//! Error types for room keys and the message codec.

use thiserror::Error;

/// A room key failed validation.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RoomKeyError {
    /// Room keys must contain at least one byte.
    #[error("room key is empty")]
    Empty,
    /// Room keys are bounded so channel names stay small.
    #[error("room key is {len} bytes, limit is {max}")]
    TooLong {
        /// Actual key length in bytes.
        len: usize,
        /// Maximum accepted length.
        max: usize,
    },
}

/// Failure to encode or decode a [`crate::Message`].
#[derive(Debug, Error)]
pub enum CodecError {
    /// Serializing the envelope failed.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    /// Inbound bytes are not a valid envelope.
    #[error("malformed message: {0}")]
    Decode(#[source] serde_json::Error),
    /// The broker channel does not follow the `room:{key}` naming.
    #[error("channel {channel:?} is not a room channel")]
    NotARoomChannel {
        /// The offending channel name.
        channel: String,
    },
    /// The envelope names a different room than the channel it arrived on.
    #[error("message for room {message_room:?} arrived on channel {channel:?}")]
    ChannelMismatch {
        /// Channel the message was delivered on.
        channel: String,
        /// Room named inside the envelope.
        message_room: String,
    },
}
