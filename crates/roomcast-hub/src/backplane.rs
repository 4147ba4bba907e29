//! Broker backplane.
//!
//! The only component that talks to the broker. It owns the broker link,
//! keeps the set of subscribed room channels in step with the registry, and
//! runs the inbound listener that is the sole origin of local socket delivery.
//!
//! Subscribe, unsubscribe and (re)connect are serialized on one async lock and
//! re-check registry membership under it, so concurrent joins and leaves
//! converge on "subscribed iff the room has local members".

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use roomcast_broker::{Broker, BrokerLink, Inbox};
use roomcast_core::{Message, RoomKey};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::BackplaneError;
use crate::registry::RoomRegistry;

/// Broker link state.
///
/// `Disconnected → Connecting → Subscribing → Listening → Disconnected`;
/// `Stopped` is terminal and only reached through [`Backplane::stop`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// No link.
    Disconnected,
    /// Opening a broker session.
    Connecting,
    /// Replaying active room subscriptions.
    Subscribing,
    /// Reading inbound messages.
    Listening,
    /// Shut down.
    Stopped,
}

impl LinkState {
    /// Lowercase name for health output and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribing => "subscribing",
            Self::Listening => "listening",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives every decoded inbound message.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    /// Deliver `message` to the local members of its room.
    async fn deliver(&self, message: Message);
}

/// Why [`Backplane::listen`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenExit {
    /// Cancelled by the caller.
    Stopped,
    /// The broker session ended or a link operation failed.
    LinkLost,
}

struct ActiveLink {
    link: Arc<dyn BrokerLink>,
    /// Cancelled when any operation on this link fails.
    fault: CancellationToken,
}

#[derive(Default)]
struct LinkSlot {
    active: Option<ActiveLink>,
    channels: HashSet<RoomKey>,
}

/// Mediates all cross-instance traffic through the broker.
pub struct Backplane {
    broker: Arc<dyn Broker>,
    registry: Arc<RoomRegistry>,
    slot: Mutex<LinkSlot>,
    state: watch::Sender<LinkState>,
}

impl Backplane {
    /// Create a backplane with no link yet.
    pub fn new(broker: Arc<dyn Broker>, registry: Arc<RoomRegistry>) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            broker,
            registry,
            slot: Mutex::new(LinkSlot::default()),
            state,
        }
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Connectivity signal. Receivers see every state change.
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Name of the broker behind this backplane.
    pub fn broker_name(&self) -> &str {
        self.broker.name()
    }

    /// Move to `next` unless already stopped.
    fn set_state(&self, next: LinkState) {
        let _ = self.state.send_if_modified(|current| {
            if *current == LinkState::Stopped || *current == next {
                return false;
            }
            debug!(from = %current, to = %next, "broker link state");
            *current = next;
            true
        });
    }

    /// Channels currently subscribed on the broker link.
    pub async fn subscribed_rooms(&self) -> Vec<RoomKey> {
        self.slot.lock().await.channels.iter().cloned().collect()
    }

    /// Publish `message` on its room's channel.
    ///
    /// Fails with [`BackplaneError::NotConnected`] while the link is down; the
    /// message is not retried.
    pub async fn publish(&self, message: &Message) -> Result<(), BackplaneError> {
        let payload = message.encode()?;
        let (link, fault) = {
            let slot = self.slot.lock().await;
            let active = slot.active.as_ref().ok_or(BackplaneError::NotConnected)?;
            (Arc::clone(&active.link), active.fault.clone())
        };
        if let Err(e) = link.publish(&message.room.channel(), payload).await {
            if e.is_link_loss() {
                fault.cancel();
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Subscribe to `room`'s channel.
    ///
    /// Does nothing if already subscribed or if the room has no local
    /// members. With no link the subscription is left to the next connect,
    /// which replays every active room.
    pub async fn subscribe(&self, room: &RoomKey) -> Result<(), BackplaneError> {
        let mut slot = self.slot.lock().await;
        if slot.channels.contains(room) || !self.registry.has_members(room) {
            return Ok(());
        }
        let Some(active) = slot.active.as_ref() else {
            debug!(room = %room, "no broker link, subscription deferred");
            return Ok(());
        };
        let channel = room.channel();
        if let Err(e) = active.link.subscribe(&channel).await {
            active.fault.cancel();
            return Err(e.into());
        }
        let _ = slot.channels.insert(room.clone());
        debug!(room = %room, channel = %channel, "subscribed");
        Ok(())
    }

    /// Unsubscribe from `room`'s channel.
    ///
    /// Does nothing if not subscribed or if the room has local members again.
    pub async fn unsubscribe(&self, room: &RoomKey) -> Result<(), BackplaneError> {
        let mut slot = self.slot.lock().await;
        if !slot.channels.contains(room) || self.registry.has_members(room) {
            return Ok(());
        }
        let _ = slot.channels.remove(room);
        let Some(active) = slot.active.as_ref() else {
            return Ok(());
        };
        let channel = room.channel();
        if let Err(e) = active.link.unsubscribe(&channel).await {
            active.fault.cancel();
            return Err(e.into());
        }
        debug!(room = %room, channel = %channel, "unsubscribed");
        Ok(())
    }

    /// Open a broker session and resubscribe every active room.
    ///
    /// Returns the session's inbox for [`Backplane::listen`]. On failure the
    /// state returns to `Disconnected`. A stopped backplane refuses.
    pub async fn connect(&self) -> Result<Inbox, BackplaneError> {
        if self.state() == LinkState::Stopped {
            return Err(BackplaneError::NotConnected);
        }
        self.set_state(LinkState::Connecting);
        let session = match self.broker.connect().await {
            Ok(s) => s,
            Err(e) => {
                self.set_state(LinkState::Disconnected);
                return Err(e.into());
            }
        };

        self.set_state(LinkState::Subscribing);
        let mut slot = self.slot.lock().await;
        slot.channels.clear();
        let rooms = self.registry.snapshot_active_rooms();
        for room in &rooms {
            if let Err(e) = session.link.subscribe(&room.channel()).await {
                drop(slot);
                self.set_state(LinkState::Disconnected);
                return Err(e.into());
            }
            let _ = slot.channels.insert(room.clone());
        }
        slot.active = Some(ActiveLink {
            link: session.link,
            fault: CancellationToken::new(),
        });
        drop(slot);

        info!(broker = self.broker.name(), rooms = rooms.len(), "broker link established");
        Ok(session.inbox)
    }

    /// Read inbound messages and hand each to `handler` until the link is lost
    /// or `cancel` fires.
    ///
    /// Messages that fail to decode are logged and dropped.
    pub async fn listen(
        &self,
        mut inbox: Inbox,
        handler: &dyn DeliveryHandler,
        cancel: &CancellationToken,
    ) -> ListenExit {
        let fault = match self.slot.lock().await.active.as_ref() {
            Some(active) => active.fault.clone(),
            None => return ListenExit::LinkLost,
        };
        self.set_state(LinkState::Listening);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return ListenExit::Stopped,
                () = fault.cancelled() => {
                    warn!("broker link operation failed, dropping link");
                    return ListenExit::LinkLost;
                }
                next = inbox.next_message() => match next {
                    Ok(delivery) => {
                        match Message::decode_from_channel(&delivery.channel, &delivery.payload) {
                            Ok(message) => handler.deliver(message).await,
                            Err(e) => warn!(
                                channel = %delivery.channel,
                                error = %e,
                                "dropping undecodable broker message"
                            ),
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "broker session ended");
                        return ListenExit::LinkLost;
                    }
                },
            }
        }
    }

    /// Drop the current link. Subscriptions are forgotten and replayed on the
    /// next connect.
    pub async fn disconnect(&self) {
        let mut slot = self.slot.lock().await;
        slot.active = None;
        slot.channels.clear();
        drop(slot);
        self.set_state(LinkState::Disconnected);
    }

    /// Drop the link and enter the terminal `Stopped` state.
    pub async fn stop(&self) {
        self.disconnect().await;
        self.set_state(LinkState::Stopped);
        info!("backplane stopped");
    }
}
