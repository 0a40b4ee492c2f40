// ================
// common/src/lib.rs
// ================
//! Wire protocol shared by the room relay and its clients.
//!
//! Every frame is a JSON object tagged by `type`. Notifications carry no
//! payload: a peer that receives `stream-updated` re-fetches the room state
//! from wherever it is persisted.

use serde::{Deserialize, Serialize};

/// Opaque room identifier supplied by clients.
pub type RoomId = String;

/// Tag of the `join-room` message.
pub const JOIN_ROOM: &str = "join-room";
/// Tag of the `stream-updated` message, used in both directions.
pub const STREAM_UPDATED: &str = "stream-updated";
/// Tag of the `joined-room` acknowledgment.
pub const JOINED_ROOM: &str = "joined-room";

/// Messages sent from client to server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Associate this connection with a room, leaving any previous one
    JoinRoom {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    /// Ask the server to tell every other member of the room to re-fetch
    StreamUpdated,
}

impl ClientMessage {
    /// Whether `tag` names a message this protocol version understands.
    pub fn is_known_type(tag: &str) -> bool {
        matches!(tag, JOIN_ROOM | STREAM_UPDATED)
    }
}

/// Messages sent from server to client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Join acknowledged, sent to the joining connection only
    JoinedRoom {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    /// Shared state changed somewhere in the room
    StreamUpdated,
}
