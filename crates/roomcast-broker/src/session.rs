//! Collaborator traits: what the backplane needs from a broker.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::BrokerError;

/// One inbound message: the channel it arrived on and its raw bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Channel the message was published on.
    pub channel: String,
    /// Raw payload as published.
    pub payload: Bytes,
}

/// A broker that sessions can be opened against.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Short name for logs (`memory`, `tcp`).
    fn name(&self) -> &str;

    /// Open a new session. Each session starts with no subscriptions.
    async fn connect(&self) -> Result<BrokerSession, BrokerError>;
}

/// Outbound half of a broker session.
///
/// Implementations are safe to call concurrently with the session's
/// [`Inbox`] being read.
#[async_trait]
pub trait BrokerLink: Send + Sync {
    /// Publish `payload` on `channel`.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), BrokerError>;

    /// Start receiving messages published on `channel`.
    async fn subscribe(&self, channel: &str) -> Result<(), BrokerError>;

    /// Stop receiving messages published on `channel`.
    async fn unsubscribe(&self, channel: &str) -> Result<(), BrokerError>;
}

/// Inbound half of a broker session.
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl Inbox {
    /// Create an inbox and the sender the broker side feeds.
    pub fn channel() -> (mpsc::UnboundedSender<Delivery>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Wait for the next delivery on any subscribed channel.
    ///
    /// Returns [`BrokerError::Disconnected`] once the session has ended and
    /// every buffered delivery has been read.
    pub async fn next_message(&mut self) -> Result<Delivery, BrokerError> {
        self.rx.recv().await.ok_or(BrokerError::Disconnected)
    }
}

impl fmt::Debug for Inbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inbox").finish_non_exhaustive()
    }
}

/// A connected session: a shareable link plus the inbox that only the
/// listener reads.
pub struct BrokerSession {
    /// Publish/subscribe handle.
    pub link: Arc<dyn BrokerLink>,
    /// Inbound deliveries.
    pub inbox: Inbox,
}
