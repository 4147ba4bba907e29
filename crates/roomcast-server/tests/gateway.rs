//! End-to-end gateway tests over real sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use roomcast_broker::MemoryBroker;
use roomcast_hub::{Coordinator, HubConfig, LinkState, SupervisorHandle};
use roomcast_server::{RelayServer, ServerConfig};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Instance {
    server: RelayServer,
    supervisor: SupervisorHandle,
    addr: SocketAddr,
}

impl Instance {
    async fn stop(self) {
        self.server.shutdown().shutdown();
        self.supervisor.stop().await;
    }
}

async fn instance(broker: &MemoryBroker, config: ServerConfig) -> Instance {
    let coordinator = Coordinator::new(Arc::new(broker.clone()), HubConfig::default());
    let supervisor = coordinator.start();
    let mut link = coordinator.watch_link_state();
    let _ = link.wait_for(|s| *s == LinkState::Listening).await.unwrap();

    let server = RelayServer::new(config, coordinator);
    let (addr, _serve) = server.listen().await.unwrap();
    Instance {
        server,
        supervisor,
        addr,
    }
}

async fn connect(addr: SocketAddr, query: &str) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/ws{query}")).await.unwrap();
    ws
}

async fn next_json(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn send(ws: &mut Client, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

#[tokio::test]
async fn broadcast_crosses_instances_once() {
    let broker = MemoryBroker::default();
    let one = instance(&broker, ServerConfig::default()).await;
    let two = instance(&broker, ServerConfig::default()).await;

    let mut alice = connect(one.addr, "?room=lobby").await;
    let mut bob = connect(two.addr, "?room=lobby").await;
    assert_eq!(next_json(&mut alice).await["type"], "joined");
    assert_eq!(next_json(&mut bob).await["type"], "joined");

    for payload in ["first", "second"] {
        send(
            &mut alice,
            serde_json::json!({"type": "broadcast", "payload": payload}),
        )
        .await;
    }

    for ws in [&mut alice, &mut bob] {
        for payload in ["first", "second"] {
            let frame = next_json(ws).await;
            assert_eq!(frame["type"], "message");
            assert_eq!(frame["room"], "lobby");
            assert_eq!(frame["payload"], payload);
            assert!(frame["publishedAt"].is_string());
        }
    }

    one.stop().await;
    two.stop().await;
}

#[tokio::test]
async fn switching_rooms_stops_old_room_traffic() {
    let broker = MemoryBroker::default();
    let one = instance(&broker, ServerConfig::default()).await;

    let mut mover = connect(one.addr, "?room=a").await;
    let mut stayer = connect(one.addr, "?room=a").await;
    let _ = next_json(&mut mover).await;
    let _ = next_json(&mut stayer).await;

    send(&mut mover, serde_json::json!({"type": "join", "room": "b"})).await;
    let joined = next_json(&mut mover).await;
    assert_eq!(joined["room"], "b");
    assert_eq!(joined["left"], "a");

    send(
        &mut stayer,
        serde_json::json!({"type": "broadcast", "payload": "to-a"}),
    )
    .await;
    send(
        &mut mover,
        serde_json::json!({"type": "broadcast", "payload": "to-b"}),
    )
    .await;

    assert_eq!(next_json(&mut stayer).await["payload"], "to-a");
    assert_eq!(next_json(&mut mover).await["payload"], "to-b");

    send(&mut mover, serde_json::json!({"type": "leave"})).await;
    assert_eq!(next_json(&mut mover).await["type"], "left");
    send(&mut mover, serde_json::json!({"type": "leave"})).await;
    assert_eq!(next_json(&mut mover).await["code"], "NOT_IN_ROOM");

    one.stop().await;
}

#[tokio::test]
async fn bad_frames_get_error_replies() {
    let broker = MemoryBroker::default();
    let one = instance(&broker, ServerConfig::default()).await;
    let mut ws = connect(one.addr, "").await;

    ws.send(Message::text("{")).await.unwrap();
    assert_eq!(next_json(&mut ws).await["code"], "INVALID_MESSAGE");

    send(&mut ws, serde_json::json!({"type": "join", "room": ""})).await;
    assert_eq!(next_json(&mut ws).await["code"], "INVALID_ROOM");

    one.stop().await;
}

#[tokio::test]
async fn connection_limit_refuses_upgrade() {
    let broker = MemoryBroker::default();
    let config = ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    };
    let one = instance(&broker, config).await;

    let mut first = connect(one.addr, "?room=a").await;
    let _ = next_json(&mut first).await;
    assert!(connect_async(format!("ws://{}/ws", one.addr)).await.is_err());

    first.close(None).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while one.server.connection_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    let _again = connect(one.addr, "").await;

    one.stop().await;
}

#[tokio::test]
async fn disconnect_empties_room() {
    let broker = MemoryBroker::default();
    let one = instance(&broker, ServerConfig::default()).await;

    let mut ws = connect(one.addr, "?room=solo").await;
    let _ = next_json(&mut ws).await;
    let registry = Arc::clone(one.server.state().coordinator.registry());
    assert_eq!(registry.room_count(), 1);

    drop(ws);
    tokio::time::timeout(Duration::from_secs(5), async {
        while registry.room_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    one.stop().await;
}

#[tokio::test]
async fn shutdown_closes_clients() {
    let broker = MemoryBroker::default();
    let one = instance(&broker, ServerConfig::default()).await;
    let mut ws = connect(one.addr, "?room=a").await;
    let _ = next_json(&mut ws).await;

    one.server.shutdown().shutdown();
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());

    one.supervisor.stop().await;
}
