//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::util::time::TickClock;

/// Upper bound on snapshot retention; sizes the history up front
const MAX_RETENTION_SECS: f64 = 600.0;

/// Upper bound on the idle timeout
const MAX_IDLE_TIMEOUT_SECS: f64 = 86_400.0;

/// Server configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Authoritative simulation rate
    pub tick_rate_hz: u32,
    /// How much snapshot history the server retains (seconds)
    pub snapshot_retention_secs: f64,
    /// Interpolation delay advertised to clients (ms)
    pub interp_buffer_delay_ms: u64,
    /// Maximum look-back for lag compensation (seconds, <= retention)
    pub max_lag_comp_secs: f64,
    /// Blend between bracketing snapshots when rewinding
    pub lag_comp_interpolate: bool,
    /// Sessions with no traffic for this long are closed (seconds)
    pub idle_timeout_secs: f64,

    /// Max input messages per second per connection
    pub input_rate_limit: u32,
    /// Max queued-but-unapplied commands per player
    pub max_pending_inputs: usize,
    /// Hitbox radius for player entities
    pub player_radius: f32,
    /// Seed for the authoritative world RNG
    pub world_seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_string(),
            tick_rate_hz: 20,
            snapshot_retention_secs: 5.0,
            interp_buffer_delay_ms: 100,
            max_lag_comp_secs: 5.0,
            lag_comp_interpolate: false,
            idle_timeout_secs: 10.0,
            input_rate_limit: 60,
            max_pending_inputs: 64,
            player_radius: 16.0,
            world_seed: 0x5eed,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        // PORT wins over SERVER_ADDR when both are set
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| defaults.server_addr.to_string())
        };

        let config = Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            tick_rate_hz: parse_var("TICK_RATE_HZ", defaults.tick_rate_hz)?,
            snapshot_retention_secs: parse_var(
                "SNAPSHOT_RETENTION_SECS",
                defaults.snapshot_retention_secs,
            )?,
            interp_buffer_delay_ms: parse_var(
                "INTERP_BUFFER_DELAY_MS",
                defaults.interp_buffer_delay_ms,
            )?,
            max_lag_comp_secs: parse_var("MAX_LAG_COMP_SECS", defaults.max_lag_comp_secs)?,
            lag_comp_interpolate: parse_var(
                "LAG_COMP_INTERPOLATE",
                defaults.lag_comp_interpolate,
            )?,
            idle_timeout_secs: parse_var("IDLE_TIMEOUT_SECS", defaults.idle_timeout_secs)?,
            input_rate_limit: parse_var("INPUT_RATE_LIMIT", defaults.input_rate_limit)?,
            max_pending_inputs: parse_var("MAX_PENDING_INPUTS", defaults.max_pending_inputs)?,
            player_radius: parse_var("PLAYER_RADIUS", defaults.player_radius)?,
            world_seed: parse_var("WORLD_SEED", defaults.world_seed)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate_hz == 0 || self.tick_rate_hz > 1000 {
            return Err(ConfigError::OutOfRange("TICK_RATE_HZ"));
        }
        if !(self.snapshot_retention_secs > 0.0 && self.snapshot_retention_secs <= MAX_RETENTION_SECS) {
            return Err(ConfigError::OutOfRange("SNAPSHOT_RETENTION_SECS"));
        }
        if !(self.max_lag_comp_secs >= 0.0) {
            return Err(ConfigError::OutOfRange("MAX_LAG_COMP_SECS"));
        }
        if self.max_lag_comp_secs > self.snapshot_retention_secs {
            return Err(ConfigError::LagWindowExceedsRetention {
                window: self.max_lag_comp_secs,
                retention: self.snapshot_retention_secs,
            });
        }
        if !(self.idle_timeout_secs > 0.0 && self.idle_timeout_secs <= MAX_IDLE_TIMEOUT_SECS) {
            return Err(ConfigError::OutOfRange("IDLE_TIMEOUT_SECS"));
        }
        if self.max_pending_inputs == 0 {
            return Err(ConfigError::OutOfRange("MAX_PENDING_INPUTS"));
        }
        if !(self.player_radius > 0.0 && self.player_radius.is_finite()) {
            return Err(ConfigError::OutOfRange("PLAYER_RADIUS"));
        }
        Ok(())
    }

    pub fn tick_clock(&self) -> TickClock {
        TickClock::new(self.tick_rate_hz)
    }

    /// Snapshot store capacity covering the retention window
    pub fn history_capacity(&self) -> usize {
        self.tick_clock().ticks_for_secs(self.snapshot_retention_secs) + 1
    }

    pub fn max_lag_comp_window(&self) -> Duration {
        Duration::from_secs_f64(self.max_lag_comp_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.idle_timeout_secs)
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Client-side tunables
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Render remote entities this far in the past (ms)
    pub interp_buffer_delay_ms: u64,
    /// Snapshots the interpolator keeps at minimum; it holds more when the
    /// buffer delay needs them
    pub interp_buffer_len: usize,
    /// Max unacknowledged predicted inputs before declaring a stall
    pub max_predicted_history: usize,
    /// Position/velocity tolerance when comparing to authoritative state
    pub reconcile_epsilon: f32,
    /// Corrections smaller than this are smoothed instead of snapped
    pub smoothing_threshold: f32,
    /// Exponential decay rate of the visual correction offset (per second)
    pub smoothing_decay: f32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            interp_buffer_delay_ms: 100,
            interp_buffer_len: 8,
            max_predicted_history: 256,
            reconcile_epsilon: 0.01,
            smoothing_threshold: 32.0,
            smoothing_decay: 10.0,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Value out of range: {0}")]
    OutOfRange(&'static str),

    #[error("Lag compensation window {window}s exceeds snapshot retention {retention}s")]
    LagWindowExceedsRetention { window: f64, retention: f64 },

    #[error("Invalid server address format")]
    InvalidAddress,
}
