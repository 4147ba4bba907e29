//! Connection registry: which local connections belong to which room.
//!
//! A room exists on this instance exactly while its entry is non-empty. The
//! empty/non-empty transitions reported by [`RoomRegistry::add`] and
//! [`RoomRegistry::remove`] are what drive broker subscriptions.
//!
//! All reads and writes go through one mutex. Fan-out works on a
//! [`RoomRegistry::members`] snapshot so no lock is held during socket sends.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use roomcast_core::{ConnectionId, RoomKey};
use tracing::debug;

use crate::connection::Connection;
use crate::errors::RegistryError;

/// Outcome of [`RoomRegistry::remove`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Removal {
    /// The connection was not a member of that room.
    NotMember,
    /// The connection was removed.
    Removed {
        /// The room has no local members left.
        room_empty: bool,
    },
}

impl Removal {
    /// Whether this removal emptied the room.
    pub fn room_emptied(self) -> bool {
        matches!(self, Self::Removed { room_empty: true })
    }
}

#[derive(Default)]
struct RegistryState {
    rooms: HashMap<RoomKey, HashMap<ConnectionId, Arc<Connection>>>,
    index: HashMap<ConnectionId, RoomKey>,
}

/// Process-local map from room key to its joined connections.
#[derive(Default)]
pub struct RoomRegistry {
    state: Mutex<RegistryState>,
}

impl RoomRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `conn` to `room`. Returns `true` when the room had no local
    /// members before.
    ///
    /// Adding a connection to the room it is already in is a no-op returning
    /// `false`. A connection in a different room is rejected.
    pub fn add(&self, room: RoomKey, conn: Arc<Connection>) -> Result<bool, RegistryError> {
        let mut state = self.state.lock();
        if let Some(current) = state.index.get(&conn.id) {
            if *current == room {
                return Ok(false);
            }
            return Err(RegistryError::AlreadyInRoom {
                conn_id: conn.id.clone(),
                current: current.clone(),
            });
        }

        let _ = state.index.insert(conn.id.clone(), room.clone());
        conn.set_room(Some(room.clone()));
        let members = state.rooms.entry(room.clone()).or_default();
        let first = members.is_empty();
        let _ = members.insert(conn.id.clone(), conn);
        if first {
            debug!(room = %room, "room became active");
        }
        Ok(first)
    }

    /// Remove `conn_id` from `room`.
    ///
    /// The connection stops being a member before this returns, so fan-outs
    /// that have not yet dispatched to it will skip it.
    pub fn remove(&self, room: &RoomKey, conn_id: &ConnectionId) -> Removal {
        let mut state = self.state.lock();
        if state.index.get(conn_id) != Some(room) {
            return Removal::NotMember;
        }
        let _ = state.index.remove(conn_id);

        let Some(members) = state.rooms.get_mut(room) else {
            return Removal::NotMember;
        };
        if let Some(conn) = members.remove(conn_id) {
            conn.set_room(None);
        }
        let room_empty = members.is_empty();
        if room_empty {
            let _ = state.rooms.remove(room);
            debug!(room = %room, "room became inactive");
        }
        Removal::Removed { room_empty }
    }

    /// Snapshot of the connections in `room`.
    pub fn members(&self, room: &RoomKey) -> Vec<Arc<Connection>> {
        self.state
            .lock()
            .rooms
            .get(room)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every room with at least one local member.
    pub fn snapshot_active_rooms(&self) -> Vec<RoomKey> {
        self.state.lock().rooms.keys().cloned().collect()
    }

    /// Whether `room` has any local member.
    pub fn has_members(&self, room: &RoomKey) -> bool {
        self.state.lock().rooms.contains_key(room)
    }

    /// Room that `conn_id` belongs to.
    pub fn room_of(&self, conn_id: &ConnectionId) -> Option<RoomKey> {
        self.state.lock().index.get(conn_id).cloned()
    }

    /// Members whose socket is gone or whose last send failed.
    pub fn dead_members(&self) -> Vec<(RoomKey, Arc<Connection>)> {
        let state = self.state.lock();
        state
            .rooms
            .iter()
            .flat_map(|(room, members)| {
                members
                    .values()
                    .filter(|c| c.is_dead())
                    .map(move |c| (room.clone(), Arc::clone(c)))
            })
            .collect()
    }

    /// Connections that are in some room.
    pub fn connection_count(&self) -> usize {
        self.state.lock().index.len()
    }

    /// Active rooms.
    pub fn room_count(&self) -> usize {
        self.state.lock().rooms.len()
    }

    /// Members of `room`.
    pub fn member_count(&self, room: &RoomKey) -> usize {
        self.state.lock().rooms.get(room).map_or(0, HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tokio::sync::mpsc;

    fn conn() -> Arc<Connection> {
        let (tx, _rx) = mpsc::channel(1);
        Arc::new(Connection::new(tx))
    }

    fn room(key: &str) -> RoomKey {
        RoomKey::new(key).unwrap()
    }

    #[test]
    fn first_add_reports_activation() {
        let reg = RoomRegistry::new();
        let (a, b) = (conn(), conn());
        assert!(reg.add(room("lobby"), Arc::clone(&a)).unwrap());
        assert!(!reg.add(room("lobby"), Arc::clone(&b)).unwrap());
        assert_eq!(reg.member_count(&room("lobby")), 2);
        assert_eq!(a.room(), Some(room("lobby")));
    }

    #[test]
    fn re_adding_same_room_is_noop() {
        let reg = RoomRegistry::new();
        let a = conn();
        assert!(reg.add(room("lobby"), Arc::clone(&a)).unwrap());
        assert!(!reg.add(room("lobby"), Arc::clone(&a)).unwrap());
        assert_eq!(reg.member_count(&room("lobby")), 1);
    }

    #[test]
    fn add_to_second_room_rejected() {
        let reg = RoomRegistry::new();
        let a = conn();
        let _ = reg.add(room("lobby"), Arc::clone(&a)).unwrap();
        let err = reg.add(room("arena"), Arc::clone(&a)).unwrap_err();
        assert_eq!(
            err,
            RegistryError::AlreadyInRoom {
                conn_id: a.id.clone(),
                current: room("lobby"),
            }
        );
        assert!(!reg.has_members(&room("arena")));
    }

    #[test]
    fn last_remove_reports_empty() {
        let reg = RoomRegistry::new();
        let (a, b) = (conn(), conn());
        let _ = reg.add(room("lobby"), Arc::clone(&a)).unwrap();
        let _ = reg.add(room("lobby"), Arc::clone(&b)).unwrap();

        assert_eq!(
            reg.remove(&room("lobby"), &a.id),
            Removal::Removed { room_empty: false }
        );
        assert!(reg.remove(&room("lobby"), &b.id).room_emptied());
        assert!(reg.snapshot_active_rooms().is_empty());
        assert_eq!(a.room(), None);
    }

    #[test]
    fn remove_from_wrong_room_is_not_member() {
        let reg = RoomRegistry::new();
        let a = conn();
        let _ = reg.add(room("lobby"), Arc::clone(&a)).unwrap();
        assert_eq!(reg.remove(&room("arena"), &a.id), Removal::NotMember);
        assert_eq!(reg.room_of(&a.id), Some(room("lobby")));
    }

    #[test]
    fn dead_members_lists_closed_sockets() {
        let reg = RoomRegistry::new();
        let (dead_tx, dead_rx) = mpsc::channel(1);
        let (alive_tx, _alive_rx) = mpsc::channel(1);
        let dead = Arc::new(Connection::new(dead_tx));
        let alive = Arc::new(Connection::new(alive_tx));
        let _ = reg.add(room("lobby"), Arc::clone(&dead)).unwrap();
        let _ = reg.add(room("lobby"), Arc::clone(&alive)).unwrap();
        assert!(reg.dead_members().is_empty());
        drop(dead_rx);

        let found = reg.dead_members();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, room("lobby"));
        assert_eq!(found[0].1.id, dead.id);
    }

    #[test]
    fn members_is_a_snapshot() {
        let reg = RoomRegistry::new();
        let a = conn();
        let _ = reg.add(room("lobby"), Arc::clone(&a)).unwrap();
        let snapshot = reg.members(&room("lobby"));
        let _ = reg.remove(&room("lobby"), &a.id);
        assert_eq!(snapshot.len(), 1);
        assert!(reg.members(&room("lobby")).is_empty());
    }

    #[derive(Clone, Debug)]
    enum Op {
        Join(usize, usize),
        Leave(usize, usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..6usize, 0..3usize).prop_map(|(c, r)| Op::Join(c, r)),
            (0..6usize, 0..3usize).prop_map(|(c, r)| Op::Leave(c, r)),
        ]
    }

    proptest! {
        #[test]
        fn every_connection_in_at_most_one_room(ops in proptest::collection::vec(op(), 0..64)) {
            let reg = RoomRegistry::new();
            let conns: Vec<_> = (0..6).map(|_| conn()).collect();
            let rooms: Vec<_> = ["a", "b", "c"].iter().map(|k| room(k)).collect();

            for op in ops {
                match op {
                    Op::Join(c, r) => { let _ = reg.add(rooms[r].clone(), Arc::clone(&conns[c])); }
                    Op::Leave(c, r) => { let _ = reg.remove(&rooms[r], &conns[c].id); }
                }
                for c in &conns {
                    let count = rooms
                        .iter()
                        .filter(|r| reg.members(r).iter().any(|m| m.id == c.id))
                        .count();
                    prop_assert!(count <= 1);
                    prop_assert_eq!(c.room(), reg.room_of(&c.id));
                }
                for r in reg.snapshot_active_rooms() {
                    prop_assert!(reg.member_count(&r) > 0);
                }
            }
        }
    }
}
