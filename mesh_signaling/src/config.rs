//! Server configuration
//!
//! Loaded from environment variables; every setting has a default.

use crate::router::RouterOptions;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default CORS origin for the HTTP transport.
pub const DEFAULT_ALLOWED_ORIGIN: &str = "*";

/// State file used when `MESH_STATE_FILE` is unset.
pub const DEFAULT_STATE_FILE: &str = "mesh_signaling_state.json";

/// Seconds without a poll or signal before a participant is dropped.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Maximum members per room (`None` = unlimited).
    pub max_room_size: Option<usize>,

    /// Send `participant-left` to remaining members on disconnect.
    pub announce_departures: bool,

    /// Value of `access-control-allow-origin` (default: "*").
    pub allowed_origin: String,

    /// Where server state is kept between requests (`None` = in memory only).
    pub state_file: Option<PathBuf>,

    /// Disconnect participants silent for this long (`None` = never).
    pub idle_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_room_size: None,
            announce_departures: false,
            allowed_origin: DEFAULT_ALLOWED_ORIGIN.to_string(),
            state_file: None,
            idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unlike [`Config::default`], this keeps state in [`DEFAULT_STATE_FILE`]
    /// unless `MESH_STATE_FILE` is set to an empty value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let max_room_size = match vars.get("MESH_MAX_ROOM_SIZE") {
            None => None,
            Some(value) => match value.trim().parse::<usize>() {
                Ok(0) => None,
                Ok(size) => Some(size),
                Err(_) => return Err(invalid("MESH_MAX_ROOM_SIZE", value)),
            },
        };

        let announce_departures = match vars.get("MESH_ANNOUNCE_DEPARTURES") {
            None => false,
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => return Err(invalid("MESH_ANNOUNCE_DEPARTURES", value)),
            },
        };

        let allowed_origin = vars
            .get("MESH_ALLOWED_ORIGIN")
            .cloned()
            .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGIN.to_string());
        // Must be usable as a header value.
        if allowed_origin.is_empty() || !allowed_origin.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(invalid("MESH_ALLOWED_ORIGIN", &allowed_origin));
        }

        let state_file = match vars.get("MESH_STATE_FILE") {
            None => Some(PathBuf::from(DEFAULT_STATE_FILE)),
            Some(value) if value.trim().is_empty() => None,
            Some(value) => Some(PathBuf::from(value.trim())),
        };

        let idle_timeout = match vars.get("MESH_IDLE_TIMEOUT_SECS") {
            None => Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
            Some(value) => match value.trim().parse::<u64>() {
                Ok(0) => None,
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(_) => return Err(invalid("MESH_IDLE_TIMEOUT_SECS", value)),
            },
        };

        Ok(Config {
            max_room_size,
            announce_departures,
            allowed_origin,
            state_file,
            idle_timeout,
        })
    }

    pub fn router_options(&self) -> RouterOptions {
        RouterOptions {
            max_room_size: self.max_room_size,
            announce_departures: self.announce_departures,
        }
    }
}

fn invalid(name: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    }
}
