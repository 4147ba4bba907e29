//! Wire frames for the TCP broker.
//!
//! Every frame is carried inside a length-delimited envelope
//! ([`codec`]) and laid out as:
//!
//! ```text
//! [tag: u8][channel length: u16 BE][channel: UTF-8][payload: rest of frame]
//! ```
//!
//! `Subscribe`, `Unsubscribe` and `Subscribed` carry no payload. The server
//! answers every `Subscribe` with `Subscribed` once the subscription is in
//! effect.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::LengthDelimitedCodec;

/// Largest frame either side accepts.
pub const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

const TAG_SUBSCRIBE: u8 = 1;
const TAG_UNSUBSCRIBE: u8 = 2;
const TAG_PUBLISH: u8 = 3;
const TAG_DELIVER: u8 = 4;
const TAG_SUBSCRIBED: u8 = 5;

const HEADER_LEN: usize = 3;

/// Malformed or unencodable frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than the header or the declared channel length.
    #[error("frame truncated")]
    Truncated,
    /// First byte is not a known frame tag.
    #[error("unknown frame tag {0}")]
    UnknownTag(u8),
    /// Channel bytes are not UTF-8.
    #[error("channel name is not valid UTF-8")]
    InvalidChannel,
    /// Channel name does not fit the u16 length field.
    #[error("channel name is {0} bytes, limit is 65535")]
    ChannelTooLong(usize),
    /// A subscription control frame carried payload bytes.
    #[error("unexpected payload on control frame")]
    UnexpectedPayload,
}

/// One message between a broker client and the broker server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Client → server: start receiving `channel`.
    Subscribe {
        /// Channel name.
        channel: String,
    },
    /// Client → server: stop receiving `channel`.
    Unsubscribe {
        /// Channel name.
        channel: String,
    },
    /// Client → server: publish on `channel`.
    Publish {
        /// Channel name.
        channel: String,
        /// Raw message bytes.
        payload: Bytes,
    },
    /// Server → client: a message published on a subscribed channel.
    Deliver {
        /// Channel name.
        channel: String,
        /// Raw message bytes.
        payload: Bytes,
    },
    /// Server → client: the `Subscribe` for `channel` has been applied.
    Subscribed {
        /// Channel name.
        channel: String,
    },
}

/// Length-delimited codec framing [`Frame`] bodies.
pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

impl Frame {
    fn parts(&self) -> (u8, &str, &[u8]) {
        match self {
            Self::Subscribe { channel } => (TAG_SUBSCRIBE, channel.as_str(), &[][..]),
            Self::Unsubscribe { channel } => (TAG_UNSUBSCRIBE, channel.as_str(), &[][..]),
            Self::Publish { channel, payload } => (TAG_PUBLISH, channel.as_str(), payload.as_ref()),
            Self::Deliver { channel, payload } => (TAG_DELIVER, channel.as_str(), payload.as_ref()),
            Self::Subscribed { channel } => (TAG_SUBSCRIBED, channel.as_str(), &[][..]),
        }
    }

    /// Serialize into a frame body.
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        let (tag, channel, payload) = self.parts();
        let channel_len =
            u16::try_from(channel.len()).map_err(|_| FrameError::ChannelTooLong(channel.len()))?;
        let mut buf = BytesMut::with_capacity(HEADER_LEN + channel.len() + payload.len());
        buf.put_u8(tag);
        buf.put_u16(channel_len);
        buf.put_slice(channel.as_bytes());
        buf.put_slice(payload);
        Ok(buf.freeze())
    }

    /// Parse a frame body.
    pub fn decode(mut buf: Bytes) -> Result<Self, FrameError> {
        if buf.len() < HEADER_LEN {
            return Err(FrameError::Truncated);
        }
        let tag = buf.get_u8();
        let channel_len = usize::from(buf.get_u16());
        if buf.len() < channel_len {
            return Err(FrameError::Truncated);
        }
        let channel_bytes = buf.split_to(channel_len);
        let channel = std::str::from_utf8(&channel_bytes)
            .map_err(|_| FrameError::InvalidChannel)?
            .to_owned();
        let payload = buf;

        match tag {
            TAG_SUBSCRIBE | TAG_UNSUBSCRIBE | TAG_SUBSCRIBED if !payload.is_empty() => {
                Err(FrameError::UnexpectedPayload)
            }
            TAG_SUBSCRIBE => Ok(Self::Subscribe { channel }),
            TAG_UNSUBSCRIBE => Ok(Self::Unsubscribe { channel }),
            TAG_PUBLISH => Ok(Self::Publish { channel, payload }),
            TAG_DELIVER => Ok(Self::Deliver { channel, payload }),
            TAG_SUBSCRIBED => Ok(Self::Subscribed { channel }),
            other => Err(FrameError::UnknownTag(other)),
        }
    }
}
