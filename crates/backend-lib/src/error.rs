// crates/backend-lib/src/error.rs

//! Central error type for the relay.
use crate::registry::ConnectionId;
use std::net::SocketAddr;
use thiserror::Error;

/// Relay error types
///
/// Only configuration and listen failures are fatal. Everything else is
/// logged where it happens and absorbed: a bad payload is dropped, a dead
/// peer is skipped.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Message has no type tag")]
    MissingType,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Invalid room id: {0}")]
    InvalidRoomId(String),

    #[error("Peer {0} is gone")]
    PeerGone(ConnectionId),

    #[error("Send to peer {0} timed out")]
    SendTimeout(ConnectionId),
}

impl RelayError {
    /// Whether this error should stop the process
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::Config(_) | RelayError::InvalidConfig(_) | RelayError::Bind { .. }
        )
    }

    /// Short machine-readable code, used as a log field
    pub fn error_code(&self) -> &'static str {
        match self {
            RelayError::Config(_) => "CFG_001",
            RelayError::InvalidConfig(_) => "CFG_002",
            RelayError::Bind { .. } => "NET_001",
            RelayError::Malformed(_) => "MSG_001",
            RelayError::MissingType => "MSG_002",
            RelayError::UnknownType(_) => "MSG_003",
            RelayError::InvalidRoomId(_) => "MSG_004",
            RelayError::PeerGone(_) => "PEER_001",
            RelayError::SendTimeout(_) => "PEER_002",
        }
    }
}
