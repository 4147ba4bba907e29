//! Client command dispatch.

use std::sync::Arc;

use metrics::counter;
use roomcast_core::RoomKey;
use roomcast_hub::{Connection, Coordinator, HubError};
use tracing::{debug, instrument, warn};

use crate::metrics::{BROADCASTS_TOTAL, BROADCAST_FAILURES_TOTAL, ROOM_JOINS_TOTAL, ROOM_LEAVES_TOTAL};
use crate::protocol::{
    ClientCommand, ServerEvent, BROADCAST_FAILED, INVALID_MESSAGE, INVALID_ROOM, JOIN_FAILED,
    NOT_IN_ROOM,
};

/// Handle one inbound text frame. Returns the reply to send, if any.
///
/// Successful broadcasts get no reply; the sender receives its own message
/// through the normal fan-out like every other member.
#[instrument(skip_all, fields(conn_id = %conn.id))]
pub async fn handle_text(
    text: &str,
    conn: &Arc<Connection>,
    coordinator: &Coordinator,
) -> Option<ServerEvent> {
    let command = match serde_json::from_str::<ClientCommand>(text) {
        Ok(command) => command,
        Err(e) => {
            debug!(error = %e, "unparseable client frame");
            return Some(ServerEvent::error(INVALID_MESSAGE, e.to_string()));
        }
    };

    match command {
        ClientCommand::Join { room } => Some(join_room(&room, conn, coordinator).await),
        ClientCommand::Leave => Some(leave_room(conn, coordinator).await),
        ClientCommand::Broadcast { room, payload } => {
            broadcast(room.as_deref(), payload, conn, coordinator).await
        }
    }
}

/// Move `conn` into `room`.
pub async fn join_room(room: &str, conn: &Arc<Connection>, coordinator: &Coordinator) -> ServerEvent {
    let key = match RoomKey::new(room) {
        Ok(key) => key,
        Err(e) => return ServerEvent::error(INVALID_ROOM, e.to_string()),
    };
    match coordinator.switch_room(&key, conn).await {
        Ok(left) => {
            counter!(ROOM_JOINS_TOTAL).increment(1);
            if left.is_some() {
                counter!(ROOM_LEAVES_TOTAL).increment(1);
            }
            ServerEvent::Joined {
                room: key.into(),
                left: left.map(String::from),
            }
        }
        Err(e) => {
            warn!(room = %key, error = %e, "join failed");
            ServerEvent::error(JOIN_FAILED, e.to_string())
        }
    }
}

async fn leave_room(conn: &Arc<Connection>, coordinator: &Coordinator) -> ServerEvent {
    match coordinator.disconnect(&conn.id).await {
        Some(room) => {
            counter!(ROOM_LEAVES_TOTAL).increment(1);
            ServerEvent::Left { room: room.into() }
        }
        None => ServerEvent::error(NOT_IN_ROOM, "not in a room"),
    }
}

async fn broadcast(
    room: Option<&str>,
    payload: String,
    conn: &Arc<Connection>,
    coordinator: &Coordinator,
) -> Option<ServerEvent> {
    let key = match room {
        Some(room) => match RoomKey::new(room) {
            Ok(key) => key,
            Err(e) => return Some(ServerEvent::error(INVALID_ROOM, e.to_string())),
        },
        None => match conn.room() {
            Some(key) => key,
            None => return Some(ServerEvent::error(NOT_IN_ROOM, "join a room before broadcasting")),
        },
    };

    match coordinator.broadcast(&key, payload).await {
        Ok(()) => {
            counter!(BROADCASTS_TOTAL).increment(1);
            None
        }
        Err(e) => {
            let kind = match &e {
                HubError::Backplane(b) => b.error_kind(),
                HubError::Registry(_) => "registry",
            };
            counter!(BROADCAST_FAILURES_TOTAL, "error_kind" => kind).increment(1);
            warn!(room = %key, error = %e, error_kind = kind, "broadcast dropped");
            Some(ServerEvent::error(BROADCAST_FAILED, e.to_string()))
        }
    }
}
