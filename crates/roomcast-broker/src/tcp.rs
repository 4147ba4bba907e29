//! TCP broker client.
//!
//! Each session owns one TCP connection to a [`crate::BrokerServer`]. Outbound
//! frames go through a single writer task, so frames published by one session
//! reach the server in call order. A reader task turns `Deliver` frames into
//! inbox entries and completes pending subscriptions when their `Subscribed`
//! ack arrives; [`BrokerLink::subscribe`] returns only after that ack. When
//! either task ends the session is over: the inbox drains and then reports
//! [`BrokerError::Disconnected`], and link calls fail.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::BrokerError;
use crate::frame::{self, Frame};
use crate::session::{Broker, BrokerLink, BrokerSession, Delivery, Inbox};

/// Default time allowed for the TCP handshake and for a subscribe ack.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Subscribe calls waiting for their ack, per channel, in send order.
#[derive(Default)]
struct PendingAcks(Mutex<HashMap<String, VecDeque<oneshot::Sender<()>>>>);

impl PendingAcks {
    fn register(&self, channel: &str) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.0
            .lock()
            .entry(channel.to_owned())
            .or_default()
            .push_back(tx);
        rx
    }

    /// Complete the oldest waiter for `channel`. Returns false if none.
    fn complete(&self, channel: &str) -> bool {
        let mut pending = self.0.lock();
        let Some(waiters) = pending.get_mut(channel) else {
            return false;
        };
        let waiter = waiters.pop_front();
        if waiters.is_empty() {
            let _ = pending.remove(channel);
        }
        waiter.is_some_and(|tx| {
            let _ = tx.send(());
            true
        })
    }

    /// Fail every waiter.
    fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Broker reached over TCP.
#[derive(Clone, Debug)]
pub struct TcpBroker {
    addr: String,
    connect_timeout: Duration,
}

impl TcpBroker {
    /// Broker at `addr` (`host:port`).
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the connect and subscribe-ack timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Address this broker connects to.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Broker for TcpBroker {
    fn name(&self) -> &str {
        "tcp"
    }

    async fn connect(&self) -> Result<BrokerSession, BrokerError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| BrokerError::ConnectTimeout(self.connect_timeout))??;
        stream.set_nodelay(true)?;
        debug!(addr = %self.addr, "tcp broker session opened");

        let (mut sink, mut stream) = Framed::new(stream, frame::codec()).split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
        let (inbox_tx, inbox) = Inbox::channel();
        let closed = CancellationToken::new();
        let pending = Arc::new(PendingAcks::default());

        let writer_closed = closed.clone();
        let _writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = writer_closed.cancelled() => break,
                    next = out_rx.recv() => {
                        let Some(frame) = next else { break };
                        let bytes = match frame.encode() {
                            Ok(b) => b,
                            Err(e) => {
                                warn!(error = %e, "dropping unencodable broker frame");
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(bytes).await {
                            debug!(error = %e, "tcp broker write failed");
                            break;
                        }
                    }
                }
            }
            writer_closed.cancel();
        });

        let reader_closed = closed.clone();
        let reader_pending = Arc::clone(&pending);
        let _reader = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = reader_closed.cancelled() => break,
                    next = stream.next() => match next {
                        Some(Ok(bytes)) => match Frame::decode(bytes.freeze()) {
                            Ok(Frame::Deliver { channel, payload }) => {
                                if inbox_tx.send(Delivery { channel, payload }).is_err() {
                                    break;
                                }
                            }
                            Ok(Frame::Subscribed { channel }) => {
                                if !reader_pending.complete(&channel) {
                                    warn!(%channel, "unsolicited subscribe ack");
                                }
                            }
                            Ok(other) => warn!(frame = ?other, "unexpected frame from broker"),
                            Err(e) => warn!(error = %e, "malformed frame from broker"),
                        },
                        Some(Err(e)) => {
                            debug!(error = %e, "tcp broker read failed");
                            break;
                        }
                        None => break,
                    },
                }
            }
            reader_closed.cancel();
            reader_pending.clear();
        });

        Ok(BrokerSession {
            link: Arc::new(TcpLink {
                out: out_tx,
                closed,
                pending,
                ack_timeout: self.connect_timeout,
            }),
            inbox,
        })
    }
}

struct TcpLink {
    out: mpsc::UnboundedSender<Frame>,
    closed: CancellationToken,
    pending: Arc<PendingAcks>,
    ack_timeout: Duration,
}

impl TcpLink {
    fn enqueue(&self, frame: Frame) -> Result<(), BrokerError> {
        if self.closed.is_cancelled() {
            return Err(BrokerError::Disconnected);
        }
        self.out.send(frame).map_err(|_| BrokerError::Disconnected)
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

#[async_trait]
impl BrokerLink for TcpLink {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), BrokerError> {
        self.enqueue(Frame::Publish {
            channel: channel.to_owned(),
            payload,
        })
    }

    async fn subscribe(&self, channel: &str) -> Result<(), BrokerError> {
        let ack = self.pending.register(channel);
        self.enqueue(Frame::Subscribe {
            channel: channel.to_owned(),
        })?;
        tokio::select! {
            () = self.closed.cancelled() => Err(BrokerError::Disconnected),
            acked = tokio::time::timeout(self.ack_timeout, ack) => match acked {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(BrokerError::Disconnected),
                Err(_) => {
                    warn!(%channel, timeout = ?self.ack_timeout, "subscribe not acknowledged, closing session");
                    self.closed.cancel();
                    Err(BrokerError::Disconnected)
                }
            },
        }
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BrokerError> {
        self.enqueue(Frame::Unsubscribe {
            channel: channel.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_timeout() {
        let broker = TcpBroker::new("127.0.0.1:7400").with_connect_timeout(Duration::from_millis(50));
        assert_eq!(broker.addr(), "127.0.0.1:7400");
        assert_eq!(broker.connect_timeout, Duration::from_millis(50));
        assert_eq!(broker.name(), "tcp");
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let broker = TcpBroker::new(addr.to_string());
        assert!(broker.connect().await.is_err());
    }

    #[test]
    fn acks_complete_in_order_per_channel() {
        let pending = PendingAcks::default();
        let mut first = pending.register("room:a");
        let mut second = pending.register("room:a");
        let mut other = pending.register("room:b");

        assert!(pending.complete("room:a"));
        assert!(first.try_recv().is_ok());
        assert!(second.try_recv().is_err());
        assert!(pending.complete("room:a"));
        assert!(second.try_recv().is_ok());
        assert!(!pending.complete("room:a"));

        pending.clear();
        assert!(matches!(
            other.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn unanswered_subscribe_times_out_as_link_loss() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let silent = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let broker =
            TcpBroker::new(addr.to_string()).with_connect_timeout(Duration::from_millis(100));
        let mut session = broker.connect().await.unwrap();
        let err = session.link.subscribe("room:a").await.unwrap_err();
        assert!(err.is_link_loss());
        assert!(matches!(
            session.inbox.next_message().await,
            Err(BrokerError::Disconnected)
        ));
        silent.abort();
    }
}
