//! Engine configuration.
//!
//! Loads configuration from environment variables with sensible defaults.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `SEATFLOW_SUBMISSION_DELAY_MS` | `0` | simulated transaction delay before each reservation |
//! | `SEATFLOW_MAX_COMMIT_ATTEMPTS` | `8` | conditional commits tried before giving up |
//! | `SEATFLOW_SEAT_TAKEN_RETRIES` | `1` | re-picks after losing a seat race |
//! | `SEATFLOW_SUBSCRIPTION_BUFFER` | `64` | promotion channel capacity per viewer |
//! | `SEATFLOW_RETAIN_CANCELLED` | `false` | keep cancelled tickets as `cancelled` instead of deleting |
//! | `SEATFLOW_METRICS_ADDR` | unset | Prometheus exporter address |

use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    #[error("Invalid value for {var}: {value:?}")]
    Invalid {
        /// Variable name
        var: &'static str,
        /// Raw value
        value: String,
    },

    /// A value parsed but is out of range.
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Simulated transaction delay applied before the commit-time read
    pub submission_delay: Duration,
    /// Conditional commits attempted per reservation before `StoreUnavailable`
    pub max_commit_attempts: u32,
    /// How many times `reserve_with_repick` re-picks after `SeatTaken`
    pub seat_taken_retries: u32,
    /// Capacity of each viewer's promotion channel
    pub subscription_buffer: usize,
    /// Rewrite cancelled tickets as `cancelled` instead of deleting them
    pub retain_cancelled: bool,
    /// Address the Prometheus scrape endpoint listens on, if any
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            submission_delay: Duration::ZERO,
            max_commit_attempts: 8,
            seat_taken_retries: 1,
            subscription_buffer: 64,
            retain_cancelled: false,
            metrics_addr: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables fall back to their defaults. Use
    /// [`try_from_env`](Self::try_from_env) to reject bad values instead.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            submission_delay: env::var("SEATFLOW_SUBMISSION_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.submission_delay, Duration::from_millis),
            max_commit_attempts: env::var("SEATFLOW_MAX_COMMIT_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_commit_attempts),
            seat_taken_retries: env::var("SEATFLOW_SEAT_TAKEN_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.seat_taken_retries),
            subscription_buffer: env::var("SEATFLOW_SUBSCRIPTION_BUFFER")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.subscription_buffer),
            retain_cancelled: env::var("SEATFLOW_RETAIN_CANCELLED")
                .ok()
                .and_then(|s| parse_bool(&s))
                .unwrap_or(defaults.retain_cancelled),
            metrics_addr: env::var("SEATFLOW_METRICS_ADDR").ok().and_then(|s| s.parse().ok()),
        }
    }

    /// Load configuration from environment variables, rejecting bad values.
    ///
    /// # Errors
    ///
    /// - `Invalid`: a variable is set but does not parse
    /// - `Validation`: a value is out of range
    pub fn try_from_env() -> Result<Self, ConfigError> {
        Self::try_from_lookup(|var| env::var(var).ok())
    }

    /// Like [`try_from_env`](Self::try_from_env), reading variables through
    /// `lookup`.
    ///
    /// # Errors
    ///
    /// See [`try_from_env`](Self::try_from_env).
    pub fn try_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(ms) = parsed::<u64>(&lookup, "SEATFLOW_SUBMISSION_DELAY_MS")? {
            config.submission_delay = Duration::from_millis(ms);
        }
        if let Some(n) = parsed(&lookup, "SEATFLOW_MAX_COMMIT_ATTEMPTS")? {
            config.max_commit_attempts = n;
        }
        if let Some(n) = parsed(&lookup, "SEATFLOW_SEAT_TAKEN_RETRIES")? {
            config.seat_taken_retries = n;
        }
        if let Some(n) = parsed(&lookup, "SEATFLOW_SUBSCRIPTION_BUFFER")? {
            config.subscription_buffer = n;
        }
        if let Some(raw) = lookup("SEATFLOW_RETAIN_CANCELLED") {
            config.retain_cancelled = parse_bool(&raw).ok_or(ConfigError::Invalid {
                var: "SEATFLOW_RETAIN_CANCELLED",
                value: raw,
            })?;
        }
        if let Some(addr) = parsed(&lookup, "SEATFLOW_METRICS_ADDR")? {
            config.metrics_addr = Some(addr);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if commit attempts or the subscription buffer is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_commit_attempts == 0 {
            return Err(ConfigError::Validation(
                "max_commit_attempts must be at least 1".to_string(),
            ));
        }
        if self.subscription_buffer == 0 {
            return Err(ConfigError::Validation(
                "subscription_buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the simulated submission delay.
    #[must_use]
    pub const fn with_submission_delay(mut self, delay: Duration) -> Self {
        self.submission_delay = delay;
        self
    }

    /// Set the number of conditional commit attempts.
    #[must_use]
    pub const fn with_max_commit_attempts(mut self, attempts: u32) -> Self {
        self.max_commit_attempts = attempts;
        self
    }

    /// Set how many times a lost seat race is re-picked.
    #[must_use]
    pub const fn with_seat_taken_retries(mut self, retries: u32) -> Self {
        self.seat_taken_retries = retries;
        self
    }

    /// Set the promotion channel capacity.
    #[must_use]
    pub const fn with_subscription_buffer(mut self, buffer: usize) -> Self {
        self.subscription_buffer = buffer;
        self
    }

    /// Keep cancelled tickets instead of deleting them.
    #[must_use]
    pub const fn with_retain_cancelled(mut self, retain: bool) -> Self {
        self.retain_cancelled = retain;
        self
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    lookup(var)
        .map(|value| value.trim().parse().map_err(|_| ConfigError::Invalid { var, value }))
        .transpose()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
