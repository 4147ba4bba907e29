//! Standalone TCP broker.
//!
//! A deliberately small pub/sub hub for running several roomcast instances
//! without external infrastructure. It keeps no history: a message reaches the
//! peers subscribed at the moment it is published, in the order the
//! publishing peer sent it. A `Subscribe` is acknowledged with `Subscribed`
//! after it takes effect, so a client that waits for the ack cannot miss a
//! message published afterwards.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::frame::{self, Frame};

type PeerId = u64;

#[derive(Default)]
struct ServerState {
    channels: DashMap<String, HashMap<PeerId, mpsc::UnboundedSender<Bytes>>>,
    next_peer: AtomicU64,
    peers: AtomicUsize,
}

impl ServerState {
    fn subscribe(&self, peer: PeerId, channel: &str, tx: &mpsc::UnboundedSender<Bytes>) {
        let _ = self
            .channels
            .entry(channel.to_owned())
            .or_default()
            .insert(peer, tx.clone());
    }

    fn unsubscribe(&self, peer: PeerId, channel: &str) {
        if let Some(mut peers) = self.channels.get_mut(channel) {
            let _ = peers.remove(&peer);
        }
        let _ = self.channels.remove_if(channel, |_, peers| peers.is_empty());
    }

    fn publish(&self, channel: String, payload: Bytes) -> usize {
        let targets: Vec<mpsc::UnboundedSender<Bytes>> = match self.channels.get(&channel) {
            Some(peers) => peers.values().cloned().collect(),
            None => return 0,
        };
        let bytes = match (Frame::Deliver { channel, payload }).encode() {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "cannot encode delivery");
                return 0;
            }
        };
        targets
            .iter()
            .filter(|tx| tx.send(bytes.clone()).is_ok())
            .count()
    }
}

/// TCP pub/sub broker.
#[derive(Clone, Default)]
pub struct BrokerServer {
    state: Arc<ServerState>,
}

impl BrokerServer {
    /// Create a broker with no peers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept peers on `listener` until `cancel` fires.
    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> std::io::Result<()> {
        info!(addr = %listener.local_addr()?, "broker listening");
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("broker stopping");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let state = Arc::clone(&self.state);
                    let cancel = cancel.child_token();
                    let _ = tokio::spawn(handle_peer(state, stream, addr, cancel));
                }
            }
        }
    }

    /// Number of peers subscribed to `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state.channels.get(channel).map_or(0, |p| p.len())
    }

    /// Number of connected peers.
    pub fn peer_count(&self) -> usize {
        self.state.peers.load(Ordering::Relaxed)
    }
}

async fn handle_peer(
    state: Arc<ServerState>,
    stream: TcpStream,
    addr: SocketAddr,
    cancel: CancellationToken,
) {
    let peer = state.next_peer.fetch_add(1, Ordering::Relaxed);
    let _ = state.peers.fetch_add(1, Ordering::Relaxed);
    debug!(peer, %addr, "broker peer connected");

    let (mut sink, mut frames) = Framed::new(stream, frame::codec()).split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

    let writer = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if sink.send(bytes).await.is_err() {
                break;
            }
        }
    });

    let mut subscribed: HashSet<String> = HashSet::new();
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = frames.next() => next,
        };
        let bytes = match next {
            Some(Ok(bytes)) => bytes.freeze(),
            Some(Err(e)) => {
                debug!(peer, error = %e, "broker peer read failed");
                break;
            }
            None => break,
        };
        match Frame::decode(bytes) {
            Ok(Frame::Subscribe { channel }) => {
                state.subscribe(peer, &channel, &tx);
                match (Frame::Subscribed {
                    channel: channel.clone(),
                })
                .encode()
                {
                    Ok(ack) => {
                        let _ = tx.send(ack);
                    }
                    Err(e) => warn!(peer, error = %e, "cannot encode subscribe ack"),
                }
                let _ = subscribed.insert(channel);
            }
            Ok(Frame::Unsubscribe { channel }) => {
                state.unsubscribe(peer, &channel);
                let _ = subscribed.remove(&channel);
            }
            Ok(Frame::Publish { channel, payload }) => {
                let delivered = state.publish(channel, payload);
                debug!(peer, delivered, "broker publish");
            }
            Ok(Frame::Deliver { .. } | Frame::Subscribed { .. }) => {
                warn!(peer, "peer sent a server-only frame, ignoring");
            }
            Err(e) => warn!(peer, error = %e, "malformed frame from peer"),
        }
    }

    for channel in &subscribed {
        state.unsubscribe(peer, channel);
    }
    drop(tx);
    writer.abort();
    let _ = state.peers.fetch_sub(1, Ordering::Relaxed);
    debug!(peer, %addr, "broker peer disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_publish_reaches_subscribers_only() {
        let state = ServerState::default();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        state.subscribe(1, "room:a", &tx_a);
        state.subscribe(2, "room:b", &tx_b);

        assert_eq!(state.publish("room:a".into(), Bytes::from_static(b"x")), 1);
        let frame = Frame::decode(rx_a.try_recv().unwrap()).unwrap();
        assert_eq!(
            frame,
            Frame::Deliver {
                channel: "room:a".into(),
                payload: Bytes::from_static(b"x"),
            }
        );
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn unsubscribe_removes_empty_channel() {
        let state = ServerState::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        state.subscribe(1, "room:a", &tx);
        state.unsubscribe(1, "room:a");
        assert!(state.channels.get("room:a").is_none());
        assert_eq!(state.publish("room:a".into(), Bytes::new()), 0);
    }

    #[test]
    fn duplicate_subscribe_is_single_entry() {
        let state = ServerState::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        state.subscribe(7, "room:a", &tx);
        state.subscribe(7, "room:a", &tx);
        assert_eq!(state.channels.get("room:a").unwrap().len(), 1);
    }
}
