//! Server configuration, loaded from environment variables.

use std::collections::HashMap;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use system::{PathsProtocol, DEFAULT_HISTORY_LIMIT, DEFAULT_INACTIVITY_TIMEOUT_SECS};
use thiserror::Error;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:5000";
pub const DEFAULT_SHARDS: usize = 4;
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP/websocket bind address (default: "0.0.0.0:5000").
    pub bind_address: String,

    /// Snapshots kept per undo/redo stack. 0 keeps everything.
    pub history_limit: usize,

    /// Idle time after which a student lock is released (default: 90 minutes).
    pub inactivity_timeout: Duration,

    /// How `update_paths` carries its payload in this deployment.
    pub paths_protocol: PathsProtocol,

    /// Number of workers the sessions are partitioned over.
    pub shards: usize,

    /// Events buffered per connection before it is considered too slow.
    pub outbound_buffer: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            inactivity_timeout: Duration::from_secs(DEFAULT_INACTIVITY_TIMEOUT_SECS),
            paths_protocol: PathsProtocol::default(),
            shards: DEFAULT_SHARDS,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let bind_address = vars
            .get("WHITEBOARD_BIND_ADDRESS")
            .cloned()
            .unwrap_or(defaults.bind_address);

        let history_limit = parse_var(vars, "WHITEBOARD_HISTORY_LIMIT", defaults.history_limit)?;

        let timeout_secs = positive(
            "WHITEBOARD_INACTIVITY_TIMEOUT_SECS",
            parse_var(
                vars,
                "WHITEBOARD_INACTIVITY_TIMEOUT_SECS",
                DEFAULT_INACTIVITY_TIMEOUT_SECS,
            )?,
        )?;

        let paths_protocol =
            parse_var(vars, "WHITEBOARD_PATHS_PROTOCOL", defaults.paths_protocol)?;

        let shards = positive(
            "WHITEBOARD_SHARDS",
            parse_var(vars, "WHITEBOARD_SHARDS", defaults.shards)?,
        )?;

        let outbound_buffer = positive(
            "WHITEBOARD_OUTBOUND_BUFFER",
            parse_var(vars, "WHITEBOARD_OUTBOUND_BUFFER", defaults.outbound_buffer)?,
        )?;

        Ok(Self {
            bind_address,
            history_limit,
            inactivity_timeout: Duration::from_secs(timeout_secs),
            paths_protocol,
            shards,
            outbound_buffer,
        })
    }
}

fn parse_var<T>(vars: &HashMap<String, String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match vars.get(name) {
        Some(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
            name,
            reason: format!("'{}': {}", raw, e),
        }),
        None => Ok(default),
    }
}

fn positive<T>(name: &'static str, value: T) -> Result<T, ConfigError>
where
    T: PartialOrd + Default + Display,
{
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue {
            name,
            reason: format!("must be positive, got {}", value),
        })
    }
}
