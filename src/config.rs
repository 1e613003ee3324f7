//! Configuration Module
//!
//! Handles loading and validating construction-time options from
//! environment variables.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Runtime configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Stream endpoint; the stream client is disabled when unset
    pub stream_url: Option<String>,
    /// REST backend whose responses are memoized; disabled when unset
    pub upstream_url: Option<String>,
    /// First reconnect delay
    pub reconnect_base_delay: Duration,
    /// Upper bound for reconnect delays
    pub reconnect_ceiling_delay: Duration,
    /// Give up after this many consecutive failures; None retries forever
    pub reconnect_max_attempts: Option<u32>,
    /// TTL for cache entries set without an explicit TTL
    pub default_ttl: Duration,
    /// LRU cap on cache entries, 0 for unbounded
    pub cache_max_entries: usize,
    /// Expiry sweep interval
    pub cleanup_interval: Duration,
    /// HTTP status server port
    pub server_port: u16,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `STREAM_URL` - Stream endpoint address (default: unset)
    /// - `UPSTREAM_URL` - REST backend base address (default: unset)
    /// - `RECONNECT_BASE_DELAY_MS` - First reconnect delay (default: 1000)
    /// - `RECONNECT_CEILING_DELAY_MS` - Maximum reconnect delay (default: 30000)
    /// - `RECONNECT_MAX_ATTEMPTS` - Reconnect attempt ceiling (default: unlimited)
    /// - `DEFAULT_CACHE_TTL` - Default cache TTL in seconds (default: 300)
    /// - `CACHE_MAX_ENTRIES` - LRU cap, 0 = unbounded (default: 0)
    /// - `CLEANUP_INTERVAL` - Sweep frequency in seconds (default: 1)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    ///
    /// Unset variables take the default. A set variable that does not parse
    /// (including negative numbers) is an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            stream_url: address_var("STREAM_URL"),
            upstream_url: address_var("UPSTREAM_URL"),
            reconnect_base_delay: parse_var("RECONNECT_BASE_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect_base_delay),
            reconnect_ceiling_delay: parse_var("RECONNECT_CEILING_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect_ceiling_delay),
            reconnect_max_attempts: parse_var("RECONNECT_MAX_ATTEMPTS")?,
            default_ttl: parse_var("DEFAULT_CACHE_TTL")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_ttl),
            cache_max_entries: parse_var("CACHE_MAX_ENTRIES")?
                .unwrap_or(defaults.cache_max_entries),
            cleanup_interval: parse_var("CLEANUP_INTERVAL")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.cleanup_interval),
            server_port: parse_var("SERVER_PORT")?.unwrap_or(defaults.server_port),
        })
    }

    /// Rejects values the cache and reconnect policy cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_ttl.is_zero() {
            return Err(ConfigError::Invalid {
                name: "DEFAULT_CACHE_TTL",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.reconnect_base_delay.is_zero() {
            return Err(ConfigError::Invalid {
                name: "RECONNECT_BASE_DELAY_MS",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.reconnect_ceiling_delay < self.reconnect_base_delay {
            return Err(ConfigError::Invalid {
                name: "RECONNECT_CEILING_DELAY_MS",
                reason: format!(
                    "{}ms is below the base delay of {}ms",
                    self.reconnect_ceiling_delay.as_millis(),
                    self.reconnect_base_delay.as_millis()
                ),
            });
        }
        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::Invalid {
                name: "CLEANUP_INTERVAL",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

fn address_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Reads `name`, returning `None` when it is unset or blank.
fn parse_var<T>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = match env::var(name) {
        Ok(raw) => raw,
        Err(env::VarError::NotPresent) => return Ok(None),
        Err(e) => {
            return Err(ConfigError::Invalid {
                name,
                reason: e.to_string(),
            })
        }
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse().map(Some).map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: format!("{raw:?}: {e}"),
    })
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stream_url: None,
            upstream_url: None,
            reconnect_base_delay: Duration::from_millis(1000),
            reconnect_ceiling_delay: Duration::from_millis(30_000),
            reconnect_max_attempts: None,
            default_ttl: Duration::from_secs(300),
            cache_max_entries: 0,
            cleanup_interval: Duration::from_secs(1),
            server_port: 3000,
        }
    }
}
