// ============================
// roomcast-backend/src/relay.rs
// ============================
//! Relay coordinator: connection lifecycle and message dispatch.
//!
//! Each accepted connection gets a [`Connection`] driven by its own task.
//! The connection moves through three states:
//!
//! - `Connecting`: accepted, no room yet. `stream-updated` is dropped.
//! - `Joined(room)`: after a valid `join-room`; another `join-room` moves it.
//! - `Closed`: terminal, reached exactly once via [`Connection::close`] or drop.
//!
//! `stream-updated` from a joined connection is fanned out to every other
//! member of its room. Each peer send runs as its own task under a timeout,
//! so a stalled or dead peer never holds up the rest of the room.
use crate::config::Settings;
use crate::metrics::{
    MESSAGE_DISCARDED, RELAY_DELIVERED, RELAY_DROPPED, RELAY_FANOUT, ROOM_ACTIVE, WS_ACTIVE,
    WS_CONNECTION,
};
use crate::registry::{ConnectionId, Peer, Registry};
use crate::validation::{decode_client_message, validate_client_message};
use metrics::{counter, gauge};
use roomcast_common::{ClientMessage, RoomId, ServerMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Result of one fan-out: sends are never short-circuited
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Peers whose outbound queue accepted the message
    pub delivered: usize,
    /// Peers that were gone or did not accept in time
    pub failed: Vec<ConnectionId>,
}

/// What happened to one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The connection is now in this room and was sent an acknowledgment
    Joined(RoomId),
    /// A notification went out to the sender's room peers
    Relayed(FanoutReport),
    /// `stream-updated` from a connection that never joined a room
    Orphan,
    /// Undecodable, unknown or invalid payload, or the connection is closed
    Discarded,
}

/// Point-in-time registry size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub rooms: usize,
    pub connections: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConnectionState {
    Connecting,
    Joined(RoomId),
    Closed,
}

/// The room relay. Cheap to clone; clones share one registry.
#[derive(Clone)]
pub struct Relay {
    registry: Arc<Registry>,
    settings: Arc<Settings>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl Relay {
    pub fn new(settings: Arc<Settings>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            registry: Arc::new(Registry::new()),
            settings,
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Accept a connection. The receiver yields everything that should be
    /// written to this client.
    pub fn connect(&self) -> (Connection, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(self.settings.outbound_buffer);
        let id = ConnectionId::new();
        let state = if self.is_shutting_down() {
            ConnectionState::Closed
        } else {
            self.registry.register(id, tx.clone());
            counter!(WS_CONNECTION).increment(1);
            gauge!(WS_ACTIVE).increment(1.0);
            info!(conn_id = %id, "connection accepted");
            ConnectionState::Connecting
        };
        let outbox = (state != ConnectionState::Closed).then_some(tx);

        let connection = Connection {
            id,
            relay: self.clone(),
            outbox,
            state,
        };
        (connection, rx)
    }

    /// Tell every member of `room_id` that shared state changed.
    ///
    /// Entry point for upstream code that has just mutated the room's
    /// persisted state.
    pub async fn notify_room(&self, room_id: &str) -> FanoutReport {
        let peers = self.registry.members(room_id);
        debug!(room_id, peers = peers.len(), "upstream notification");
        self.fan_out(peers, ServerMessage::StreamUpdated).await
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            rooms: self.registry.room_count(),
            connections: self.registry.connection_count(),
        }
    }

    /// Receiver that flips to `true` when [`Relay::shutdown`] is called
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Stop every connection loop and clear the registry
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let dropped = self.registry.clear();
        gauge!(ROOM_ACTIVE).set(0.0);
        info!(connections = dropped, "relay shut down");
    }

    fn send_timeout(&self) -> Duration {
        self.settings.send_timeout()
    }

    async fn fan_out(&self, peers: Vec<Peer>, message: ServerMessage) -> FanoutReport {
        let mut report = FanoutReport::default();
        if peers.is_empty() {
            return report;
        }
        counter!(RELAY_FANOUT).increment(1);

        let limit = self.send_timeout();
        let mut sends = JoinSet::new();
        for peer in peers {
            let message = message.clone();
            sends.spawn(async move { (peer.id(), peer.send(message, limit).await) });
        }

        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.delivered += 1,
                Ok((id, Err(e))) => {
                    warn!(conn_id = %id, code = e.error_code(), error = %e, "skipping peer");
                    report.failed.push(id);
                },
                Err(e) => warn!(error = %e, "peer send task failed"),
            }
        }

        counter!(RELAY_DELIVERED).increment(report.delivered as u64);
        counter!(RELAY_DROPPED).increment(report.failed.len() as u64);
        report
    }
}

/// One accepted client connection
pub struct Connection {
    id: ConnectionId,
    relay: Relay,
    outbox: Option<mpsc::Sender<ServerMessage>>,
    state: ConnectionState,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Room the registry currently holds this connection in, if any
    pub fn room(&self) -> Option<RoomId> {
        self.relay.registry.room_of(self.id)
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Decode one inbound text frame and act on it. Bad payloads are logged
    /// and dropped; the connection stays open.
    pub async fn handle_text(&mut self, text: &str) -> Dispatch {
        match decode_client_message(text) {
            Ok(msg) => self.handle_message(msg).await,
            Err(e) => {
                self.discard(&e);
                Dispatch::Discarded
            },
        }
    }

    pub async fn handle_message(&mut self, msg: ClientMessage) -> Dispatch {
        if self.is_closed() {
            return Dispatch::Discarded;
        }
        if let Err(e) = validate_client_message(&msg, self.relay.settings.max_room_id_len) {
            self.discard(&e);
            return Dispatch::Discarded;
        }

        match msg {
            ClientMessage::JoinRoom { room_id } => self.join(room_id).await,
            ClientMessage::StreamUpdated => self.relay_update().await,
        }
    }

    async fn join(&mut self, room_id: RoomId) -> Dispatch {
        let registry = &self.relay.registry;
        if !registry.join(self.id, &room_id) {
            if matches!(self.state, ConnectionState::Joined(_)) {
                self.state = ConnectionState::Connecting;
            }
            debug!(conn_id = %self.id, room_id = %room_id, "join after close ignored");
            return Dispatch::Discarded;
        }
        gauge!(ROOM_ACTIVE).set(registry.room_count() as f64);
        debug!(conn_id = %self.id, room_id = %room_id, "joined room");
        self.state = ConnectionState::Joined(room_id.clone());

        if let Some(outbox) = &self.outbox {
            let ack = ServerMessage::JoinedRoom {
                room_id: room_id.clone(),
            };
            let me = Peer::new(self.id, outbox.clone());
            if let Err(e) = me.send(ack, self.relay.send_timeout()).await {
                warn!(conn_id = %self.id, error = %e, "join acknowledgment not sent");
            }
        }
        Dispatch::Joined(room_id)
    }

    async fn relay_update(&mut self) -> Dispatch {
        // the registry is authoritative: a shutdown clears it underneath us
        let Some(room_id) = self.relay.registry.room_of(self.id) else {
            if matches!(self.state, ConnectionState::Joined(_)) {
                self.state = ConnectionState::Connecting;
            }
            debug!(conn_id = %self.id, "stream-updated before join-room, dropped");
            return Dispatch::Orphan;
        };
        let peers = self.relay.registry.members_except(&room_id, self.id);
        debug!(conn_id = %self.id, room_id = %room_id, peers = peers.len(), "relaying stream-updated");
        Dispatch::Relayed(self.relay.fan_out(peers, ServerMessage::StreamUpdated).await)
    }

    fn discard(&self, e: &crate::error::RelayError) {
        counter!(MESSAGE_DISCARDED).increment(1);
        warn!(conn_id = %self.id, code = e.error_code(), error = %e, "discarding inbound message");
    }

    /// Leave the current room and release the connection. Idempotent.
    pub fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        let room = self.relay.registry.close(self.id);
        self.state = ConnectionState::Closed;
        self.outbox = None;

        gauge!(WS_ACTIVE).decrement(1.0);
        gauge!(ROOM_ACTIVE).set(self.relay.registry.room_count() as f64);
        info!(conn_id = %self.id, room_id = ?room, "connection closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
