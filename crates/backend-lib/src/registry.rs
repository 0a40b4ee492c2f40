// ============================
// roomcast-backend/src/registry.rs
// ============================
//! Connection registry: which connection is in which room.
//!
//! Two indexes are kept strictly in sync behind one lock: room to member set
//! and connection to room. A connection is in the member set of room `R`
//! iff its inverse entry is `R`, and a room entry exists only while it has
//! at least one member. The lock is held for a map update or a snapshot copy,
//! never across a send.
use crate::error::RelayError;
use parking_lot::Mutex;
use roomcast_common::{RoomId, ServerMessage};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identity of one accepted connection, assigned at accept time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Sending half of a live connection, as handed out in member snapshots
#[derive(Debug, Clone)]
pub struct Peer {
    id: ConnectionId,
    outbox: mpsc::Sender<ServerMessage>,
}

impl Peer {
    pub fn new(id: ConnectionId, outbox: mpsc::Sender<ServerMessage>) -> Self {
        Self { id, outbox }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue `message` for this peer, giving up after `limit`
    pub async fn send(&self, message: ServerMessage, limit: Duration) -> Result<(), RelayError> {
        match tokio::time::timeout(limit, self.outbox.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(RelayError::PeerGone(self.id)),
            Err(_) => Err(RelayError::SendTimeout(self.id)),
        }
    }
}

#[derive(Default)]
struct Inner {
    live: HashMap<ConnectionId, mpsc::Sender<ServerMessage>>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
    room_of: HashMap<ConnectionId, RoomId>,
}

impl Inner {
    /// Drop `id` from its room, deleting the room once empty
    fn detach(&mut self, id: ConnectionId) -> Option<RoomId> {
        let room = self.room_of.remove(&id)?;
        if let Some(members) = self.rooms.get_mut(&room) {
            members.remove(&id);
            if members.is_empty() {
                self.rooms.remove(&room);
            }
        }
        Some(room)
    }

    fn snapshot<'a>(&self, ids: impl Iterator<Item = &'a ConnectionId>) -> Vec<Peer> {
        ids.filter_map(|id| self.live.get(id).map(|tx| Peer::new(*id, tx.clone())))
            .collect()
    }
}

/// Room membership shared by every connection task
#[derive(Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly accepted connection as live
    pub fn register(&self, id: ConnectionId, outbox: mpsc::Sender<ServerMessage>) {
        self.inner.lock().live.insert(id, outbox);
    }

    pub fn is_live(&self, id: ConnectionId) -> bool {
        self.inner.lock().live.contains_key(&id)
    }

    /// Move `id` into `room`, leaving its previous room in the same critical
    /// section. Returns `false` without touching anything if the connection
    /// is no longer live.
    pub fn join(&self, id: ConnectionId, room: &str) -> bool {
        let mut inner = self.inner.lock();
        if !inner.live.contains_key(&id) {
            return false;
        }
        if inner.room_of.get(&id).map(String::as_str) == Some(room) {
            return true;
        }
        inner.detach(id);
        inner.rooms.entry(room.to_string()).or_default().insert(id);
        inner.room_of.insert(id, room.to_string());
        true
    }

    /// Remove `id` from its current room but keep it live. Safe to call
    /// repeatedly. Connection teardown goes through [`Registry::close`].
    pub fn leave(&self, id: ConnectionId) -> Option<RoomId> {
        self.inner.lock().detach(id)
    }

    /// Leave the current room and forget the connection entirely
    pub fn close(&self, id: ConnectionId) -> Option<RoomId> {
        let mut inner = self.inner.lock();
        inner.live.remove(&id);
        inner.detach(id)
    }

    /// Snapshot of every member of `room` other than `excluded`
    pub fn members_except(&self, room: &str, excluded: ConnectionId) -> Vec<Peer> {
        let inner = self.inner.lock();
        match inner.rooms.get(room) {
            Some(members) => inner.snapshot(members.iter().filter(|id| **id != excluded)),
            None => Vec::new(),
        }
    }

    /// Snapshot of every member of `room`
    pub fn members(&self, room: &str) -> Vec<Peer> {
        let inner = self.inner.lock();
        match inner.rooms.get(room) {
            Some(members) => inner.snapshot(members.iter()),
            None => Vec::new(),
        }
    }

    pub fn room_of(&self, id: ConnectionId) -> Option<RoomId> {
        self.inner.lock().room_of.get(&id).cloned()
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.inner.lock().rooms.get(room).map_or(0, HashSet::len)
    }

    /// Number of rooms with at least one member
    pub fn room_count(&self) -> usize {
        self.inner.lock().rooms.len()
    }

    /// Number of live connections, joined or not
    pub fn connection_count(&self) -> usize {
        self.inner.lock().live.len()
    }

    /// Forget every connection and room, returning how many connections
    /// were dropped
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let dropped = inner.live.len();
        *inner = Inner::default();
        dropped
    }

    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let inner = self.inner.lock();
        for (room, members) in &inner.rooms {
            assert!(!members.is_empty(), "room {room} lingers with no members");
            for id in members {
                assert_eq!(inner.room_of.get(id), Some(room), "{id} missing inverse entry");
                assert!(inner.live.contains_key(id), "{id} is closed but still in {room}");
            }
        }
        for (id, room) in &inner.room_of {
            assert!(
                inner.rooms.get(room).is_some_and(|m| m.contains(id)),
                "{id} points at {room} but is not a member"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn live(registry: &Registry) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(8);
        registry.register(id, tx);
        (id, rx)
    }

    fn ids(peers: &[Peer]) -> HashSet<ConnectionId> {
        peers.iter().map(Peer::id).collect()
    }

    #[test]
    fn test_join_creates_room() {
        let registry = Registry::new();
        let (a, _rx) = live(&registry);

        assert!(registry.join(a, "ABCDEF"));
        registry.assert_consistent();

        assert_eq!(registry.room_of(a).as_deref(), Some("ABCDEF"));
        assert_eq!(registry.room_count(), 1);
        assert_eq!(registry.member_count("ABCDEF"), 1);
    }

    #[test]
    fn test_join_same_room_is_idempotent() {
        let registry = Registry::new();
        let (a, _rx) = live(&registry);

        assert!(registry.join(a, "ABCDEF"));
        assert!(registry.join(a, "ABCDEF"));
        registry.assert_consistent();

        assert_eq!(registry.member_count("ABCDEF"), 1);
        assert_eq!(registry.room_count(), 1);
    }

    #[test]
    fn test_rejoin_moves_connection() {
        let registry = Registry::new();
        let (a, _rx_a) = live(&registry);
        let (b, _rx_b) = live(&registry);

        registry.join(a, "R1");
        registry.join(b, "R1");
        registry.join(a, "R2");
        registry.assert_consistent();

        assert_eq!(registry.room_of(a).as_deref(), Some("R2"));
        assert_eq!(ids(&registry.members("R1")), HashSet::from([b]));
        assert_eq!(ids(&registry.members("R2")), HashSet::from([a]));
    }

    #[test]
    fn test_last_member_leaving_deletes_room() {
        let registry = Registry::new();
        let (a, _rx) = live(&registry);

        registry.join(a, "R1");
        registry.join(a, "R2");
        registry.assert_consistent();
        assert_eq!(registry.room_count(), 1);

        assert_eq!(registry.leave(a).as_deref(), Some("R2"));
        registry.assert_consistent();
        assert_eq!(registry.room_count(), 0);
        assert_eq!(registry.room_of(a), None);
    }

    #[test]
    fn test_leave_is_idempotent() {
        let registry = Registry::new();
        let (a, _rx) = live(&registry);

        assert_eq!(registry.leave(a), None);
        registry.join(a, "R1");
        assert!(registry.leave(a).is_some());
        assert_eq!(registry.leave(a), None);
        registry.assert_consistent();
        // leaving a room does not close the connection
        assert!(registry.is_live(a));
    }

    #[test]
    fn test_join_after_close_is_noop() {
        let registry = Registry::new();
        let (a, _rx) = live(&registry);

        registry.join(a, "R1");
        assert_eq!(registry.close(a).as_deref(), Some("R1"));
        assert_eq!(registry.close(a), None);

        assert!(!registry.join(a, "R1"));
        registry.assert_consistent();
        assert_eq!(registry.room_count(), 0);
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_members_except_excludes_sender() {
        let registry = Registry::new();
        let (a, _rx_a) = live(&registry);
        let (b, _rx_b) = live(&registry);
        let (c, _rx_c) = live(&registry);
        let (d, _rx_d) = live(&registry);

        for id in [a, b, c] {
            registry.join(id, "R1");
        }
        registry.join(d, "R2");

        assert_eq!(ids(&registry.members_except("R1", a)), HashSet::from([b, c]));
        assert!(registry.members_except("R2", d).is_empty());
        assert!(registry.members_except("unknown", a).is_empty());
    }

    #[test]
    fn test_members_except_is_a_snapshot() {
        let registry = Registry::new();
        let (a, _rx_a) = live(&registry);
        let (b, _rx_b) = live(&registry);

        registry.join(a, "R1");
        registry.join(b, "R1");
        let snapshot = registry.members_except("R1", a);
        registry.close(b);

        assert_eq!(ids(&snapshot), HashSet::from([b]));
        assert!(registry.members_except("R1", a).is_empty());
    }

    #[test]
    fn test_clear_drops_everything() {
        let registry = Registry::new();
        let (a, _rx_a) = live(&registry);
        let (_b, _rx_b) = live(&registry);
        registry.join(a, "R1");

        assert_eq!(registry.clear(), 2);
        registry.assert_consistent();
        assert_eq!(registry.room_count(), 0);
        assert!(!registry.is_live(a));
    }

    #[tokio::test]
    async fn test_peer_send_reports_gone_and_timeout() {
        let gone = ConnectionId::new();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let err = Peer::new(gone, tx)
            .send(ServerMessage::StreamUpdated, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::PeerGone(id) if id == gone));

        let stalled = ConnectionId::new();
        let (tx, _rx) = mpsc::channel(1);
        let peer = Peer::new(stalled, tx);
        peer.send(ServerMessage::StreamUpdated, Duration::from_millis(50))
            .await
            .unwrap();
        let err = peer
            .send(ServerMessage::StreamUpdated, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::SendTimeout(id) if id == stalled));
    }

    #[test]
    fn test_concurrent_joins_and_moves() {
        let registry = Arc::new(Registry::new());
        let mut receivers = Vec::new();
        let mut conns = Vec::new();
        for _ in 0..50 {
            let (id, rx) = live(&registry);
            conns.push(id);
            receivers.push(rx);
        }

        std::thread::scope(|scope| {
            for (i, id) in conns.iter().copied().enumerate() {
                let registry = Arc::clone(&registry);
                scope.spawn(move || {
                    registry.join(id, "LOAD1");
                    if i % 2 == 0 {
                        registry.join(id, "LOAD2");
                        registry.join(id, "LOAD1");
                    }
                    if i % 5 == 0 {
                        registry.close(id);
                    }
                });
            }
        });

        registry.assert_consistent();
        assert_eq!(registry.member_count("LOAD1"), 40);
        assert_eq!(registry.room_count(), 1);
        assert_eq!(registry.members_except("LOAD1", conns[1]).len(), 39);
    }
}
