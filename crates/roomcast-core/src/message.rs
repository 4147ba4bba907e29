//! The room message envelope.
//!
//! A [`Message`] travels over the broker as JSON:
//!
//! ```json
//! {"room":"lobby","payload":"hello","publishedAt":"2026-01-01T00:00:00Z","origin":"inst_…"}
//! ```
//!
//! Local sockets receive a different, client-facing frame built by
//! [`Message::client_frame`], which omits the publishing instance.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::CodecError;
use crate::ids::InstanceId;
use crate::room::RoomKey;

/// Immutable value published to a room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Room the message is scoped to.
    pub room: RoomKey,
    /// Opaque application payload.
    pub payload: String,
    /// When the publishing instance created the message.
    pub published_at: DateTime<Utc>,
    /// Instance that published the message.
    pub origin: InstanceId,
}

/// Client-facing rendering of a message.
#[derive(Serialize)]
#[serde(tag = "type", rename = "message", rename_all = "camelCase")]
struct MessageFrame<'a> {
    room: &'a RoomKey,
    payload: &'a str,
    published_at: &'a DateTime<Utc>,
}

impl Message {
    /// Build a message stamped with the current time.
    pub fn new(room: RoomKey, payload: impl Into<String>, origin: InstanceId) -> Self {
        Self {
            room,
            payload: payload.into(),
            published_at: Utc::now(),
            origin,
        }
    }

    /// Serialize for publishing on the broker.
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(CodecError::Encode)
    }

    /// Parse an envelope without checking where it came from.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::Decode)
    }

    /// Parse an envelope delivered on `channel`.
    ///
    /// The channel must be a room channel and must name the same room as the
    /// envelope.
    pub fn decode_from_channel(channel: &str, bytes: &[u8]) -> Result<Self, CodecError> {
        let room = RoomKey::from_channel(channel).ok_or_else(|| CodecError::NotARoomChannel {
            channel: channel.to_owned(),
        })?;
        let message = Self::decode(bytes)?;
        if message.room != room {
            return Err(CodecError::ChannelMismatch {
                channel: channel.to_owned(),
                message_room: message.room.into(),
            });
        }
        Ok(message)
    }

    /// Text frame pushed to a member's socket.
    pub fn client_frame(&self) -> Result<String, CodecError> {
        serde_json::to_string(&MessageFrame {
            room: &self.room,
            payload: &self.payload,
            published_at: &self.published_at,
        })
        .map_err(CodecError::Encode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lobby() -> RoomKey {
        RoomKey::new("lobby").unwrap()
    }

    #[test]
    fn encode_uses_camel_case() {
        let msg = Message::new(lobby(), "hello", InstanceId::from_raw("inst_1"));
        let bytes = msg.encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["room"], "lobby");
        assert_eq!(value["payload"], "hello");
        assert_eq!(value["origin"], "inst_1");
        assert!(value["publishedAt"].is_string());
    }

    #[test]
    fn decode_accepts_encoded_message() {
        let msg = Message::new(lobby(), "hi", InstanceId::new());
        let back = Message::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = Message::decode(b"not json").unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[test]
    fn decode_rejects_empty_room() {
        let raw = br#"{"room":"","payload":"x","publishedAt":"2026-01-01T00:00:00Z","origin":"i"}"#;
        assert!(Message::decode(raw).is_err());
    }

    #[test]
    fn decode_from_channel_checks_room() {
        let msg = Message::new(lobby(), "hi", InstanceId::new());
        let bytes = msg.encode().unwrap();
        assert!(Message::decode_from_channel("room:lobby", &bytes).is_ok());
        let err = Message::decode_from_channel("room:arena", &bytes).unwrap_err();
        assert!(matches!(err, CodecError::ChannelMismatch { .. }));
    }

    #[test]
    fn decode_from_foreign_channel_fails() {
        let msg = Message::new(lobby(), "hi", InstanceId::new());
        let err = Message::decode_from_channel("metrics", &msg.encode().unwrap()).unwrap_err();
        assert!(matches!(err, CodecError::NotARoomChannel { .. }));
    }

    #[test]
    fn client_frame_shape() {
        let msg = Message::new(lobby(), "hello", InstanceId::new());
        let frame: serde_json::Value = serde_json::from_str(&msg.client_frame().unwrap()).unwrap();
        assert_eq!(frame["type"], "message");
        assert_eq!(frame["room"], "lobby");
        assert_eq!(frame["payload"], "hello");
        assert!(frame["publishedAt"].is_string());
        assert!(frame.get("origin").is_none());
    }
}
