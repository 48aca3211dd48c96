//! Service Configuration Settings
//!
//! Configuration types for the currency service, loaded from environment
//! variables. Every setting has a default; a variable that is present but
//! unusable is an error rather than silently ignored.

use std::str::FromStr;
use std::time::Duration;

use crate::infrastructure::ecb::DEFAULT_ECB_URL;

/// Longest accepted update interval or snapshot timeout.
const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// gRPC server port.
    pub grpc_port: u16,
    /// Health check and metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            grpc_port: 9092,
            health_port: 8092,
        }
    }
}

/// Rate table settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateSettings {
    /// URL of the reference rate document loaded at startup.
    pub snapshot_url: String,
    /// Request timeout for the snapshot fetch.
    pub snapshot_timeout: Duration,
    /// Time between simulated rate changes.
    pub update_interval: Duration,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            snapshot_url: DEFAULT_ECB_URL.to_string(),
            snapshot_timeout: Duration::from_secs(10),
            update_interval: Duration::from_secs(5),
        }
    }
}

/// Streaming fan-out settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingSettings {
    /// Rate change signals buffered for a slow listener.
    pub signal_capacity: usize,
    /// Updates buffered per streaming connection before pushes are dropped.
    pub subscriber_buffer: usize,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            signal_capacity: 16,
            subscriber_buffer: 64,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Rate table settings.
    pub rates: RateSettings,
    /// Streaming settings.
    pub streaming: StreamingSettings,
}

impl ServiceConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unusable value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let server = ServerSettings {
            grpc_port: parse_var(&lookup, "CURRENCY_GRPC_PORT", defaults.server.grpc_port)?,
            health_port: parse_var(&lookup, "CURRENCY_HEALTH_PORT", defaults.server.health_port)?,
        };

        let snapshot_url = match lookup("RATE_SNAPSHOT_URL") {
            Some(url) if url.trim().is_empty() => {
                return Err(ConfigError::EmptyValue("RATE_SNAPSHOT_URL".to_string()));
            }
            Some(url) => url.trim().to_string(),
            None => defaults.rates.snapshot_url,
        };

        let rates = RateSettings {
            snapshot_url,
            snapshot_timeout: parse_secs(
                &lookup,
                "RATE_SNAPSHOT_TIMEOUT_SECS",
                defaults.rates.snapshot_timeout,
            )?,
            update_interval: parse_secs(
                &lookup,
                "RATE_UPDATE_INTERVAL_SECS",
                defaults.rates.update_interval,
            )?,
        };

        let streaming = StreamingSettings {
            signal_capacity: parse_var(
                &lookup,
                "RATE_SIGNAL_CAPACITY",
                defaults.streaming.signal_capacity,
            )?,
            subscriber_buffer: parse_var(
                &lookup,
                "SUBSCRIBER_BUFFER_CAPACITY",
                defaults.streaming.subscriber_buffer,
            )?,
        };

        let config = Self {
            server,
            rates,
            streaming,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check values that parse but cannot be used.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroValue`] for a zero interval, timeout, or
    /// capacity, and [`ConfigError::TooLarge`] for an interval or timeout
    /// longer than a day.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = [
            ("RATE_SNAPSHOT_TIMEOUT_SECS", self.rates.snapshot_timeout.is_zero()),
            ("RATE_UPDATE_INTERVAL_SECS", self.rates.update_interval.is_zero()),
            ("RATE_SIGNAL_CAPACITY", self.streaming.signal_capacity == 0),
            ("SUBSCRIBER_BUFFER_CAPACITY", self.streaming.subscriber_buffer == 0),
        ];
        if let Some((key, _)) = zero.into_iter().find(|(_, is_zero)| *is_zero) {
            return Err(ConfigError::ZeroValue(key.to_string()));
        }

        let durations = [
            ("RATE_SNAPSHOT_TIMEOUT_SECS", self.rates.snapshot_timeout),
            ("RATE_UPDATE_INTERVAL_SECS", self.rates.update_interval),
        ];
        match durations.into_iter().find(|(_, d)| *d > MAX_DURATION) {
            Some((key, _)) => Err(ConfigError::TooLarge {
                key: key.to_string(),
                max_secs: MAX_DURATION.as_secs(),
            }),
            None => Ok(()),
        }
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable must be greater than zero.
    #[error("environment variable {0} must be greater than zero")]
    ZeroValue(String),
    /// Environment variable exceeds its upper bound.
    #[error("environment variable {key} must be at most {max_secs} seconds")]
    TooLarge {
        /// Variable name.
        key: String,
        /// Largest accepted value.
        max_secs: u64,
    },
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
    }
}

fn parse_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    parse_var(lookup, key, default.as_secs()).map(Duration::from_secs)
}
