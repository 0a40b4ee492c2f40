// ============================
// roomcast-backend/src/lib.rs
// ============================
//! Room-scoped publish/subscribe relay.
//!
//! Clients viewing the same room open one WebSocket each, send `join-room`,
//! and send `stream-updated` after they change the room's shared state. The
//! relay forwards that signal to every other member of the room, who then
//! re-fetch the state themselves. Nothing is stored or replayed.

pub mod config;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod relay;
pub mod validation;
pub mod ws_router;

pub use roomcast_common::{ClientMessage, RoomId, ServerMessage};

use crate::config::Settings;
use crate::error::RelayError;
use crate::relay::Relay;
use std::sync::Arc;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// The room relay
    pub relay: Relay,
    /// Settings the relay was started with
    pub settings: Arc<Settings>,
}

impl AppState {
    /// Create a new application state
    pub fn new(settings: Settings) -> Result<Self, RelayError> {
        settings.validate()?;
        let settings = Arc::new(settings);
        let relay = Relay::new(settings.clone());
        Ok(Self { relay, settings })
    }
}
