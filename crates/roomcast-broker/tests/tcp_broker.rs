//! End-to-end tests: `TcpBroker` sessions against a live `BrokerServer`.

use std::time::Duration;

use bytes::Bytes;
use roomcast_broker::{Broker, BrokerError, BrokerServer, TcpBroker};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

async fn start_server() -> (BrokerServer, String, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let server = BrokerServer::new();
    let cancel = CancellationToken::new();
    let srv = server.clone();
    let token = cancel.clone();
    let _ = tokio::spawn(async move { srv.serve(listener, token).await });
    (server, addr, cancel)
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn publish_reaches_other_session() {
    let (server, addr, cancel) = start_server().await;
    let broker = TcpBroker::new(addr);

    let mut sub = broker.connect().await.unwrap();
    let publisher = broker.connect().await.unwrap();

    sub.link.subscribe("room:lobby").await.unwrap();
    wait_until(|| server.subscriber_count("room:lobby") == 1).await;

    publisher
        .link
        .publish("room:lobby", Bytes::from_static(b"hello"))
        .await
        .unwrap();

    let delivery = tokio::time::timeout(Duration::from_secs(2), sub.inbox.next_message())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.channel, "room:lobby");
    assert_eq!(delivery.payload, Bytes::from_static(b"hello"));
    cancel.cancel();
}

#[tokio::test]
async fn publish_order_is_preserved() {
    let (server, addr, cancel) = start_server().await;
    let broker = TcpBroker::new(addr);

    let mut sub = broker.connect().await.unwrap();
    let publisher = broker.connect().await.unwrap();
    sub.link.subscribe("room:seq").await.unwrap();
    wait_until(|| server.subscriber_count("room:seq") == 1).await;

    for i in 0..20 {
        publisher
            .link
            .publish("room:seq", Bytes::from(format!("{i}")))
            .await
            .unwrap();
    }
    for i in 0..20 {
        let d = sub.inbox.next_message().await.unwrap();
        assert_eq!(d.payload, Bytes::from(format!("{i}")));
    }
    cancel.cancel();
}

#[tokio::test]
async fn unsubscribe_and_disconnect_clear_server_state() {
    let (server, addr, cancel) = start_server().await;
    let broker = TcpBroker::new(addr);

    let a = broker.connect().await.unwrap();
    let b = broker.connect().await.unwrap();
    a.link.subscribe("room:x").await.unwrap();
    b.link.subscribe("room:x").await.unwrap();
    wait_until(|| server.subscriber_count("room:x") == 2).await;

    a.link.unsubscribe("room:x").await.unwrap();
    wait_until(|| server.subscriber_count("room:x") == 1).await;

    drop(b);
    wait_until(|| server.subscriber_count("room:x") == 0).await;
    wait_until(|| server.peer_count() == 1).await;
    cancel.cancel();
}

#[tokio::test]
async fn server_shutdown_ends_sessions() {
    let (server, addr, cancel) = start_server().await;
    let broker = TcpBroker::new(addr);
    let mut session = broker.connect().await.unwrap();
    wait_until(|| server.peer_count() == 1).await;

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(2), session.inbox.next_message())
        .await
        .unwrap();
    assert!(matches!(result, Err(BrokerError::Disconnected)));

    assert!(session.link.subscribe("room:late").await.is_err());
}

#[tokio::test]
async fn subscribe_returns_after_server_registered_it() {
    let (server, addr, cancel) = start_server().await;
    let broker = TcpBroker::new(addr);
    let publisher = broker.connect().await.unwrap();

    for round in 0..50 {
        let channel = format!("room:r{round}");
        let mut sub = broker.connect().await.unwrap();
        sub.link.subscribe(&channel).await.unwrap();
        assert_eq!(server.subscriber_count(&channel), 1);

        publisher
            .link
            .publish(&channel, Bytes::from(format!("{round}")))
            .await
            .unwrap();
        let delivery = tokio::time::timeout(Duration::from_secs(2), sub.inbox.next_message())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.payload, Bytes::from(format!("{round}")));
    }
    cancel.cancel();
}

#[tokio::test]
async fn concurrent_subscribes_on_one_session_all_complete() {
    let (server, addr, cancel) = start_server().await;
    let broker = TcpBroker::new(addr);
    let session = broker.connect().await.unwrap();

    let channels: Vec<String> = (0..10).map(|i| format!("room:c{}", i % 3)).collect();
    let results =
        futures::future::join_all(channels.iter().map(|c| session.link.subscribe(c))).await;
    assert!(results.iter().all(Result::is_ok));
    for i in 0..3 {
        assert_eq!(server.subscriber_count(&format!("room:c{i}")), 1);
    }
    cancel.cancel();
}
