//! Configuration module for metricstream.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::time::Duration;
use thiserror::Error;

/// Configuration error types.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
}

/// Streaming manager configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Base URL of the metrics server (default: "http://localhost:8080")
    pub base_url: String,
    /// Delay between a transport close and the reconnect attempt (default: 3s)
    pub reconnect_delay: Duration,
    /// Grace period after the last unsubscribe before the connection is closed (default: 10s)
    pub teardown_delay: Duration,
    /// Period of the idle reaper sweep (default: 60s)
    pub reap_interval: Duration,
    /// Inactivity after which an unsubscribed target is reaped (default: 5m)
    pub idle_threshold: Duration,
    /// Points kept per history series (default: 60)
    pub history_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            reconnect_delay: Duration::from_secs(3),
            teardown_delay: Duration::from_secs(10),
            reap_interval: Duration::from_secs(60),
            idle_threshold: Duration::from_secs(5 * 60),
            history_capacity: 60,
        }
    }
}

const BASE_URL: &str = "METRICSTREAM_BASE_URL";
const RECONNECT_DELAY: &str = "METRICSTREAM_RECONNECT_DELAY_MS";
const TEARDOWN_DELAY: &str = "METRICSTREAM_TEARDOWN_DELAY_MS";
const REAP_INTERVAL: &str = "METRICSTREAM_REAP_INTERVAL_MS";
const IDLE_THRESHOLD: &str = "METRICSTREAM_IDLE_THRESHOLD_MS";
const HISTORY_CAPACITY: &str = "METRICSTREAM_HISTORY_CAPACITY";

impl StreamConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `METRICSTREAM_BASE_URL`: metrics server base URL
    /// - `METRICSTREAM_RECONNECT_DELAY_MS`: reconnect delay in milliseconds
    /// - `METRICSTREAM_TEARDOWN_DELAY_MS`: debounced teardown delay in milliseconds
    /// - `METRICSTREAM_REAP_INTERVAL_MS`: idle reaper period in milliseconds
    /// - `METRICSTREAM_IDLE_THRESHOLD_MS`: idle reap threshold in milliseconds
    /// - `METRICSTREAM_HISTORY_CAPACITY`: points kept per history series
    ///
    /// Invalid values are logged and the default is kept.
    pub fn load() -> Self {
        Self::from_lookup(|var| env::var(var).ok(), false).unwrap_or_default()
    }

    /// Like [`StreamConfig::load`], but fails on the first invalid value.
    pub fn try_load() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok(), true)
    }

    fn from_lookup<F>(lookup: F, strict: bool) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(url) = lookup(BASE_URL) {
            let url = url.trim().trim_end_matches('/').to_string();
            if url.is_empty() {
                reject(BASE_URL, &url, strict)?;
            } else {
                cfg.base_url = url;
            }
        }

        let millis = |var: &'static str, target: &mut Duration| -> Result<(), ConfigError> {
            if let Some(raw) = lookup(var) {
                match raw.trim().parse::<u64>() {
                    Ok(ms) if ms > 0 => *target = Duration::from_millis(ms),
                    _ => reject(var, &raw, strict)?,
                }
            }
            Ok(())
        };

        millis(RECONNECT_DELAY, &mut cfg.reconnect_delay)?;
        millis(TEARDOWN_DELAY, &mut cfg.teardown_delay)?;
        millis(REAP_INTERVAL, &mut cfg.reap_interval)?;
        millis(IDLE_THRESHOLD, &mut cfg.idle_threshold)?;

        if let Some(raw) = lookup(HISTORY_CAPACITY) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => cfg.history_capacity = n,
                _ => reject(HISTORY_CAPACITY, &raw, strict)?,
            }
        }

        Ok(cfg)
    }
}

fn reject(var: &'static str, value: &str, strict: bool) -> Result<(), ConfigError> {
    if strict {
        return Err(ConfigError::InvalidValue {
            var,
            value: value.to_string(),
        });
    }
    tracing::warn!("Config: ignoring invalid value {:?} for {}", value, var);
    Ok(())
}
