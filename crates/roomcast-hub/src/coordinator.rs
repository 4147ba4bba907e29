//! Broadcast coordinator: the public API of the hub.
//!
//! `broadcast` only ever publishes to the backplane. Local sockets are written
//! solely from the backplane listener's callback ([`Coordinator::fan_out`]),
//! so a message reaches each member once whether the publisher is local or
//! remote.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use roomcast_broker::Broker;
use roomcast_core::{ConnectionId, InstanceId, Message, RoomKey};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backplane::{Backplane, DeliveryHandler, LinkState};
use crate::connection::Connection;
use crate::errors::HubError;
use crate::registry::{Removal, RoomRegistry};
use crate::supervisor::{self, HubConfig, SupervisorHandle};

/// Outcome of one fan-out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Members the frame was handed to.
    pub delivered: usize,
    /// Members whose send failed and were removed.
    pub failed: usize,
}

/// Composes the registry and the backplane.
#[derive(Clone)]
pub struct Coordinator {
    instance: InstanceId,
    registry: Arc<RoomRegistry>,
    backplane: Arc<Backplane>,
    config: HubConfig,
}

impl Coordinator {
    /// Create a coordinator for a new instance on `broker`.
    pub fn new(broker: Arc<dyn Broker>, config: HubConfig) -> Self {
        let registry = Arc::new(RoomRegistry::new());
        let backplane = Arc::new(Backplane::new(broker, Arc::clone(&registry)));
        Self {
            instance: InstanceId::new(),
            registry,
            backplane,
            config,
        }
    }

    /// This instance's ID, stamped on every published message.
    pub fn instance_id(&self) -> &InstanceId {
        &self.instance
    }

    /// The local registry.
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// The broker backplane.
    pub fn backplane(&self) -> &Arc<Backplane> {
        &self.backplane
    }

    /// Hub timing configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Current broker link state.
    pub fn link_state(&self) -> LinkState {
        self.backplane.state()
    }

    /// Connectivity signal.
    pub fn watch_link_state(&self) -> watch::Receiver<LinkState> {
        self.backplane.watch_state()
    }

    /// Add `conn` to `room`, subscribing the room's channel if it is the
    /// first local member.
    ///
    /// Fails if `conn` is already in a different room; use
    /// [`Coordinator::switch_room`] to move.
    pub async fn join(&self, room: &RoomKey, conn: &Arc<Connection>) -> Result<(), HubError> {
        let first = self.registry.add(room.clone(), Arc::clone(conn))?;
        debug!(room = %room, conn_id = %conn.id, first, "joined");
        if first {
            if let Err(e) = self.backplane.subscribe(room).await {
                warn!(room = %room, error = %e, "subscribe failed, will resubscribe on reconnect");
            }
        }
        Ok(())
    }

    /// Remove `conn_id` from `room`, unsubscribing if the room emptied.
    /// Returns whether the connection was a member.
    pub async fn leave(&self, room: &RoomKey, conn_id: &ConnectionId) -> bool {
        let removal = self.registry.remove(room, conn_id);
        if removal == Removal::NotMember {
            return false;
        }
        debug!(room = %room, conn_id = %conn_id, "left");
        if removal.room_emptied() {
            if let Err(e) = self.backplane.unsubscribe(room).await {
                warn!(room = %room, error = %e, "unsubscribe failed");
            }
        }
        true
    }

    /// Move `conn` to `room`, leaving its current room first. Returns the room
    /// it left, if any. Switching to the current room is a no-op.
    pub async fn switch_room(
        &self,
        room: &RoomKey,
        conn: &Arc<Connection>,
    ) -> Result<Option<RoomKey>, HubError> {
        let previous = self.registry.room_of(&conn.id);
        let left = match previous {
            Some(current) if current == *room => return Ok(None),
            Some(current) => {
                let _ = self.leave(&current, &conn.id).await;
                Some(current)
            }
            None => None,
        };
        self.join(room, conn).await?;
        Ok(left)
    }

    /// Remove `conn_id` from whatever room it is in. Called when the socket
    /// closes.
    pub async fn disconnect(&self, conn_id: &ConnectionId) -> Option<RoomKey> {
        let room = self.registry.room_of(conn_id)?;
        self.leave(&room, conn_id).await.then_some(room)
    }

    /// Publish `payload` to `room` on every instance.
    ///
    /// Never writes to local sockets. Fails while the broker link is down;
    /// the message is dropped.
    pub async fn broadcast(&self, room: &RoomKey, payload: impl Into<String>) -> Result<(), HubError> {
        let message = Message::new(room.clone(), payload, self.instance.clone());
        self.backplane.publish(&message).await?;
        Ok(())
    }

    /// Deliver `message` to every local member of its room.
    ///
    /// Sends run concurrently, each bounded by the send timeout. Members whose
    /// send fails are removed.
    pub async fn fan_out(&self, message: &Message) -> FanOutReport {
        let members = self.registry.members(&message.room);
        if members.is_empty() {
            return FanOutReport::default();
        }
        let frame: Arc<str> = match message.client_frame() {
            Ok(f) => Arc::from(f),
            Err(e) => {
                warn!(room = %message.room, error = %e, "cannot render message frame");
                return FanOutReport::default();
            }
        };

        let timeout = self.config.send_timeout;
        let results = join_all(
            members
                .iter()
                .map(|conn| conn.deliver(&message.room, Arc::clone(&frame), timeout)),
        )
        .await;

        let mut report = FanOutReport::default();
        for (conn, result) in members.iter().zip(results) {
            match result {
                Ok(true) => report.delivered += 1,
                Ok(false) => {}
                Err(e) => {
                    debug!(room = %message.room, conn_id = %conn.id, error = %e, "send failed, pruning");
                    if self.leave(&message.room, &conn.id).await {
                        report.failed += 1;
                    }
                }
            }
        }
        report
    }

    /// Remove every member whose socket is gone or whose last send failed.
    /// Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let mut pruned = 0;
        for (room, conn) in self.registry.dead_members() {
            if self.leave(&room, &conn.id).await {
                pruned += 1;
            }
        }
        if pruned > 0 {
            info!(pruned, "swept dead connections");
        }
        pruned
    }

    /// Start the backplane listener and the supervisor's background work.
    pub fn start(&self) -> SupervisorHandle {
        supervisor::spawn(self.clone())
    }
}

#[async_trait]
impl DeliveryHandler for Coordinator {
    async fn deliver(&self, message: Message) {
        let report = self.fan_out(&message).await;
        debug!(
            room = %message.room,
            delivered = report.delivered,
            failed = report.failed,
            "fan-out"
        );
    }
}
