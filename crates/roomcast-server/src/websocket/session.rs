//! One client socket: writer task, heartbeat task and the read loop.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use roomcast_hub::Connection;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use super::handler::{handle_text, join_room};
use super::heartbeat::{run_heartbeat, HeartbeatResult};
use crate::metrics::{
    HEARTBEAT_TIMEOUTS_TOTAL, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};
use crate::protocol::{ServerEvent, INVALID_MESSAGE};
use crate::server::AppState;

/// How long the writer gets to send a close frame once the session ends.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Drive a WebSocket until the client leaves, goes silent, or the server
/// shuts down. The connection is removed from its room on the way out.
pub async fn run_session(socket: WebSocket, state: AppState, initial_room: Option<String>) {
    let (tx, mut rx) = mpsc::channel::<Arc<str>>(state.config.send_queue.max(1));
    let conn = Arc::new(Connection::new(tx));
    let cancel = state.shutdown.token().child_token();
    let (mut sink, mut stream) = socket.split();

    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    info!(conn_id = %conn.id, room = initial_room.as_deref(), "client connected");

    let ping_every = state.config.heartbeat_interval();
    let writer_cancel = cancel.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping = time::interval_at(Instant::now() + ping_every, ping_every);
        loop {
            tokio::select! {
                biased;
                () = writer_cancel.cancelled() => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    if sink.send(WsMessage::Text(frame.as_ref().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if sink.send(WsMessage::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut heartbeat = tokio::spawn(run_heartbeat(
        Arc::clone(&conn),
        ping_every,
        state.config.heartbeat_timeout(),
        cancel.clone(),
    ));

    if let Some(room) = initial_room {
        let event = join_room(&room, &conn, &state.coordinator).await;
        reply(&conn, &event);
    }

    let reason = loop {
        tokio::select! {
            () = cancel.cancelled() => break "shutdown",
            result = &mut heartbeat => {
                break match result {
                    Ok(HeartbeatResult::TimedOut) => {
                        counter!(HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
                        "heartbeat_timeout"
                    }
                    Ok(HeartbeatResult::SendFailed) => "send_failed",
                    Ok(HeartbeatResult::Cancelled) | Err(_) => "shutdown",
                };
            }
            inbound = stream.next() => match inbound {
                Some(Ok(WsMessage::Text(text))) => {
                    conn.mark_alive();
                    if let Some(event) = handle_text(text.as_str(), &conn, &state.coordinator).await {
                        reply(&conn, &event);
                    }
                }
                Some(Ok(WsMessage::Binary(_))) => {
                    conn.mark_alive();
                    reply(&conn, &ServerEvent::error(INVALID_MESSAGE, "binary frames are not supported"));
                }
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => conn.mark_alive(),
                Some(Ok(WsMessage::Close(_))) | None => break "client_closed",
                Some(Err(e)) => {
                    debug!(conn_id = %conn.id, error = %e, "socket read failed");
                    break "read_error";
                }
            }
        }
    };

    cancel.cancel();
    heartbeat.abort();
    if time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }

    let room = state.coordinator.disconnect(&conn.id).await;
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    info!(
        conn_id = %conn.id,
        reason,
        room = room.as_ref().map(roomcast_core::RoomKey::as_str),
        dropped = conn.drop_count(),
        "client disconnected"
    );
}

fn reply(conn: &Connection, event: &ServerEvent) {
    if let Err(e) = conn.try_send(Arc::from(event.to_json())) {
        warn!(conn_id = %conn.id, error = %e, "reply dropped");
    }
}
