//! Handle to one client's live socket.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use roomcast_core::{ConnectionId, RoomKey};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};

use crate::errors::SendError;

/// A connected client.
///
/// Outbound frames go to the socket's writer task through a bounded queue. A
/// failed send marks the connection dead; it is then pruned either inline by
/// the coordinator or by the supervisor's sweep.
pub struct Connection {
    /// Process-unique connection ID.
    pub id: ConnectionId,
    tx: mpsc::Sender<Arc<str>>,
    /// Room this connection currently belongs to. Written only by the registry.
    room: Mutex<Option<RoomKey>>,
    /// When the socket was accepted.
    pub connected_at: Instant,
    /// Whether the client answered the last ping.
    pub is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    send_failed: AtomicBool,
    /// Frames dropped because the queue was full.
    pub dropped_messages: AtomicU64,
}

impl Connection {
    /// Create a connection with a fresh ID.
    pub fn new(tx: mpsc::Sender<Arc<str>>) -> Self {
        Self::with_id(ConnectionId::new(), tx)
    }

    /// Create a connection with a known ID.
    pub fn with_id(id: ConnectionId, tx: mpsc::Sender<Arc<str>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            room: Mutex::new(None),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            send_failed: AtomicBool::new(false),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Room this connection is a member of, if any.
    pub fn room(&self) -> Option<RoomKey> {
        self.room.lock().clone()
    }

    /// Whether this connection is currently a member of `room`.
    pub fn is_member_of(&self, room: &RoomKey) -> bool {
        self.room.lock().as_ref() == Some(room)
    }

    pub(crate) fn set_room(&self, room: Option<RoomKey>) {
        *self.room.lock() = room;
    }

    /// Push a frame, waiting up to `timeout` for queue space.
    pub async fn send(&self, frame: Arc<str>, timeout: Duration) -> Result<(), SendError> {
        match self.tx.send_timeout(frame, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                self.mark_failed();
                Err(SendError::TimedOut)
            }
            Err(SendTimeoutError::Closed(_)) => {
                self.mark_failed();
                Err(SendError::Closed)
            }
        }
    }

    /// Push a frame without waiting. A full queue drops the frame but does
    /// not mark the connection dead.
    pub fn try_send(&self, frame: Arc<str>) -> Result<(), SendError> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(SendError::Full)
            }
            Err(TrySendError::Closed(_)) => {
                self.mark_failed();
                Err(SendError::Closed)
            }
        }
    }

    /// Send a room frame, unless the connection has left `room` in the
    /// meantime. Returns whether a send was attempted.
    pub async fn deliver(
        &self,
        room: &RoomKey,
        frame: Arc<str>,
        timeout: Duration,
    ) -> Result<bool, SendError> {
        if !self.is_member_of(room) {
            return Ok(false);
        }
        self.send(frame, timeout).await.map(|()| true)
    }

    /// Record that a send to this connection failed.
    pub fn mark_failed(&self) {
        self.send_failed.store(true, Ordering::Relaxed);
    }

    /// Whether the socket is gone or a send has failed.
    pub fn is_dead(&self) -> bool {
        self.send_failed.load(Ordering::Relaxed) || self.tx.is_closed()
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong or any inbound frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Read and clear the alive flag. Returns the previous value.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last pong.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("room", &self.room())
            .field("dead", &self.is_dead())
            .finish_non_exhaustive()
    }
}
