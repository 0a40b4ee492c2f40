// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for metric keys
pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_ACTIVE: &str = "ws.active";
pub const ROOM_ACTIVE: &str = "room.active";
pub const RELAY_FANOUT: &str = "relay.fanout";
pub const RELAY_DELIVERED: &str = "relay.delivered";
pub const RELAY_DROPPED: &str = "relay.dropped";
pub const MESSAGE_DISCARDED: &str = "message.discarded";
