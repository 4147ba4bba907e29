//! Broker error type.

use std::time::Duration;

use thiserror::Error;

/// Failure talking to the broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker refused or could not accept a new session.
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    /// Connecting did not complete in time.
    #[error("broker connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    /// The session this link or inbox belonged to has ended.
    #[error("broker session disconnected")]
    Disconnected,
    /// Socket-level failure.
    #[error("broker i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl BrokerError {
    /// Whether the session is gone and a reconnect is required.
    pub fn is_link_loss(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Io(_))
    }

    /// Short classification string for logs and metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::ConnectTimeout(_) => "connect_timeout",
            Self::Disconnected => "disconnected",
            Self::Io(_) => "io",
        }
    }
}
