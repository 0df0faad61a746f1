//! Configuration
//!
//! Defaults match the live game: a 10 second countdown, 60 second sessions,
//! two players minimum. Every value can be overridden from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::network::peer::{PeerId, ADMIN_PEER_ID};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Matchmaking coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminConfig {
    /// Countdown from the second joiner to session start.
    pub countdown: Duration,
    /// Session length.
    pub game_duration: Duration,
    /// Players needed to start a countdown.
    pub min_players: usize,
    /// Well-known admin id.
    pub admin_id: PeerId,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            countdown: Duration::from_secs(10),
            game_duration: Duration::from_secs(60),
            min_players: 2,
            admin_id: PeerId::new(ADMIN_PEER_ID),
        }
    }
}

impl AdminConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Create config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(secs) = parse_var::<u64, _>(&lookup, "JUMPY_COUNTDOWN_SECS")? {
            config.countdown = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "JUMPY_GAME_SECS")? {
            if secs == 0 {
                return Err(invalid("JUMPY_GAME_SECS", "0", "must be positive"));
            }
            config.game_duration = Duration::from_secs(secs);
        }
        if let Some(min) = parse_var::<usize, _>(&lookup, "JUMPY_MIN_PLAYERS")? {
            if min < 2 {
                return Err(invalid("JUMPY_MIN_PLAYERS", &min.to_string(), "sessions need at least 2 players"));
            }
            config.min_players = min;
        }
        if let Some(id) = lookup("JUMPY_ADMIN_ID") {
            if id.is_empty() {
                return Err(invalid("JUMPY_ADMIN_ID", "", "must not be empty"));
            }
            config.admin_id = PeerId::new(id);
        }
        Ok(config)
    }

    /// Countdown length in milliseconds.
    pub fn countdown_ms(&self) -> i64 {
        self.countdown.as_millis() as i64
    }

    /// Session length in milliseconds.
    pub fn game_duration_ms(&self) -> i64 {
        self.game_duration.as_millis() as i64
    }
}

/// WebSocket server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Outbound frame buffer per connection.
    pub channel_capacity: usize,
    /// How often the coordinator is polled.
    pub tick_interval: Duration,
    /// Coordinator settings.
    pub admin: AdminConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9999)),
            max_connections: 1000,
            channel_capacity: 64,
            tick_interval: Duration::from_millis(16),
            admin: AdminConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Create config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self {
            admin: AdminConfig::from_lookup(&lookup)?,
            ..Self::default()
        };
        if let Some(addr) = parse_var(&lookup, "JUMPY_BIND_ADDR")? {
            config.bind_addr = addr;
        }
        if let Some(max) = parse_var(&lookup, "JUMPY_MAX_CONNECTIONS")? {
            config.max_connections = max;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "JUMPY_TICK_MS")? {
            if ms == 0 {
                return Err(invalid("JUMPY_TICK_MS", "0", "must be positive"));
            }
            config.tick_interval = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| invalid(var, &raw, &e.to_string())),
    }
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
