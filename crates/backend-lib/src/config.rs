// ============================
// roomcast-backend/src/config.rs
// ============================
//! Configuration management.
use crate::error::RelayError;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Config file looked up in the working directory by [`Settings::load`]
pub const DEFAULT_CONFIG_FILE: &str = "roomcast.toml";
/// Prefix of environment overrides, e.g. `ROOMCAST_BIND_ADDR`
pub const ENV_PREFIX: &str = "ROOMCAST_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Relay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Upper bound on a single outbound send to one peer, in milliseconds
    pub send_timeout_ms: u64,
    /// Capacity of each connection's outbound queue
    pub outbound_buffer: usize,
    /// Longest accepted room id, in bytes
    pub max_room_id_len: usize,
    /// Log level used when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            send_timeout_ms: 2000,
            outbound_buffer: 32,
            max_room_id_len: 128,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from defaults, `roomcast.toml` and the environment
    pub fn load() -> Result<Self, RelayError> {
        Self::extract(Self::figment(DEFAULT_CONFIG_FILE))
    }

    /// Load settings with an explicit config file path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        Self::extract(Self::figment(path))
    }

    fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    fn extract(figment: Figment) -> Result<Self, RelayError> {
        let settings: Settings = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Per-peer send bound as a `Duration`
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Reject settings the relay cannot run with
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.send_timeout_ms == 0 {
            return Err(RelayError::InvalidConfig(
                "send_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.outbound_buffer == 0 {
            return Err(RelayError::InvalidConfig(
                "outbound_buffer must be greater than zero".to_string(),
            ));
        }
        if self.max_room_id_len == 0 {
            return Err(RelayError::InvalidConfig(
                "max_room_id_len must be greater than zero".to_string(),
            ));
        }
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(RelayError::InvalidConfig(format!(
                "unknown log level: {}",
                self.log_level
            )));
        }
        Ok(())
    }
}
