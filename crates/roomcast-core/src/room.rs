//! Room keys and broker channel naming.
//!
//! A room has no stored representation. It is a key plus the broker channel
//! derived from it, `room:{key}`. The mapping is one-to-one so an inbound
//! delivery can always be traced back to the room it belongs to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::RoomKeyError;

/// Prefix of every room channel on the broker.
pub const CHANNEL_PREFIX: &str = "room:";

/// Upper bound on a room key, in bytes.
pub const MAX_ROOM_KEY_LEN: usize = 256;

/// Opaque, validated room identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomKey(String);

impl RoomKey {
    /// Validate and wrap a room key.
    pub fn new(key: impl Into<String>) -> Result<Self, RoomKeyError> {
        let key = key.into();
        if key.is_empty() {
            return Err(RoomKeyError::Empty);
        }
        if key.len() > MAX_ROOM_KEY_LEN {
            return Err(RoomKeyError::TooLong {
                len: key.len(),
                max: MAX_ROOM_KEY_LEN,
            });
        }
        Ok(Self(key))
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Broker channel carrying this room's traffic.
    pub fn channel(&self) -> String {
        format!("{CHANNEL_PREFIX}{}", self.0)
    }

    /// Recover the room key from a broker channel name.
    ///
    /// Returns `None` for channels outside the `room:` namespace or with an
    /// invalid key.
    pub fn from_channel(channel: &str) -> Option<Self> {
        channel
            .strip_prefix(CHANNEL_PREFIX)
            .and_then(|key| Self::new(key).ok())
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RoomKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for RoomKey {
    type Err = RoomKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for RoomKey {
    type Error = RoomKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoomKey> for String {
    fn from(key: RoomKey) -> Self {
        key.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn channel_uses_prefix() {
        let room = RoomKey::new("lobby").unwrap();
        assert_eq!(room.channel(), "room:lobby");
    }

    #[test]
    fn from_channel_recovers_key() {
        let room = RoomKey::from_channel("room:arena").unwrap();
        assert_eq!(room.as_str(), "arena");
    }

    #[test]
    fn from_channel_rejects_foreign_namespace() {
        assert!(RoomKey::from_channel("presence:lobby").is_none());
        assert!(RoomKey::from_channel("lobby").is_none());
    }

    #[test]
    fn from_channel_rejects_empty_key() {
        assert!(RoomKey::from_channel("room:").is_none());
    }

    #[test]
    fn empty_key_rejected() {
        assert_eq!(RoomKey::new(""), Err(RoomKeyError::Empty));
    }

    #[test]
    fn oversized_key_rejected() {
        let long = "x".repeat(MAX_ROOM_KEY_LEN + 1);
        assert!(matches!(
            RoomKey::new(long),
            Err(RoomKeyError::TooLong { len: 257, max: 256 })
        ));
    }

    #[test]
    fn key_may_contain_colons() {
        let room = RoomKey::new("game:42").unwrap();
        assert_eq!(room.channel(), "room:game:42");
        assert_eq!(RoomKey::from_channel(&room.channel()), Some(room));
    }

    #[test]
    fn deserialize_validates() {
        assert!(serde_json::from_str::<RoomKey>("\"\"").is_err());
        let room: RoomKey = serde_json::from_str("\"lobby\"").unwrap();
        assert_eq!(room.as_str(), "lobby");
    }

    proptest! {
        #[test]
        fn channel_mapping_is_injective(key in "[a-zA-Z0-9:_-]{1,64}") {
            let room = RoomKey::new(key.clone()).unwrap();
            prop_assert_eq!(RoomKey::from_channel(&room.channel()), Some(room));
        }
    }
}
