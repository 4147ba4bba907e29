//! In-process broker.
//!
//! Several hubs sharing one [`MemoryBroker`] behave like several server
//! instances sharing an external broker. Fault injection lets tests cut every
//! session ([`MemoryBroker::drop_connections`]) or refuse new ones
//! ([`MemoryBroker::set_available`]). Dropping a session's link ends the
//! session, like closing a socket.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::BrokerError;
use crate::session::{Broker, BrokerLink, BrokerSession, Delivery, Inbox};

/// Call counters, for asserting on backplane behavior.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Sessions opened.
    pub connects: u64,
    /// `publish` calls that reached a live session.
    pub publishes: u64,
    /// `subscribe` calls that reached a live session.
    pub subscribes: u64,
    /// `unsubscribe` calls that reached a live session.
    pub unsubscribes: u64,
}

struct MemorySession {
    tx: mpsc::UnboundedSender<Delivery>,
    channels: HashSet<String>,
}

#[derive(Default)]
struct MemoryState {
    next_session: u64,
    sessions: HashMap<u64, MemorySession>,
    unavailable: bool,
    stats: BrokerStats,
}

/// Broker living entirely in this process.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// End every open session. Returns how many were cut.
    pub fn drop_connections(&self) -> usize {
        let mut state = self.state.lock();
        let count = state.sessions.len();
        state.sessions.clear();
        debug!(sessions = count, "memory broker dropped all sessions");
        count
    }

    /// Accept (`true`) or refuse (`false`) new sessions.
    pub fn set_available(&self, available: bool) {
        self.state.lock().unavailable = !available;
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Number of sessions subscribed to `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state
            .lock()
            .sessions
            .values()
            .filter(|s| s.channels.contains(channel))
            .count()
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> BrokerStats {
        self.state.lock().stats
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> Result<BrokerSession, BrokerError> {
        let mut state = self.state.lock();
        if state.unavailable {
            return Err(BrokerError::Unavailable("memory broker is offline".into()));
        }
        let id = state.next_session;
        state.next_session += 1;
        state.stats.connects += 1;

        let (tx, inbox) = Inbox::channel();
        let _ = state.sessions.insert(
            id,
            MemorySession {
                tx,
                channels: HashSet::new(),
            },
        );
        drop(state);

        debug!(session = id, "memory broker session opened");
        Ok(BrokerSession {
            link: Arc::new(MemoryLink {
                session: id,
                state: Arc::clone(&self.state),
            }),
            inbox,
        })
    }
}

struct MemoryLink {
    session: u64,
    state: Arc<Mutex<MemoryState>>,
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        let _ = self.state.lock().sessions.remove(&self.session);
    }
}

#[async_trait]
impl BrokerLink for MemoryLink {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        if !state.sessions.contains_key(&self.session) {
            return Err(BrokerError::Disconnected);
        }
        state.stats.publishes += 1;
        for session in state.sessions.values() {
            if session.channels.contains(channel) {
                let _ = session.tx.send(Delivery {
                    channel: channel.to_owned(),
                    payload: payload.clone(),
                });
            }
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        let session = state
            .sessions
            .get_mut(&self.session)
            .ok_or(BrokerError::Disconnected)?;
        let _ = session.channels.insert(channel.to_owned());
        state.stats.subscribes += 1;
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        let session = state
            .sessions
            .get_mut(&self.session)
            .ok_or(BrokerError::Disconnected)?;
        let _ = session.channels.remove(channel);
        state.stats.unsubscribes += 1;
        Ok(())
    }
}
