//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file only needs the keys it changes.

use scout_core::retry::ReconnectPolicy;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "stream": { "endpoint": "https://api.example.com/events", "maxRetryDelayMs": 10000 },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoutSettings {
    /// Event stream connection settings.
    pub stream: StreamSettings,
    /// Network reachability probe settings.
    pub reachability: ReachabilitySettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl ScoutSettings {
    /// Reject combinations the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.stream.validate()?;
        self.reachability.validate()
    }
}

/// Event stream connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    /// Fixed SSE endpoint.
    pub endpoint: String,
    /// Query parameter that carries the session credential.
    pub token_param: String,
    /// Delay before the first reconnect attempt, in milliseconds.
    pub initial_retry_delay_ms: u64,
    /// Ceiling for the reconnect delay, in milliseconds.
    pub max_retry_delay_ms: u64,
    /// Jitter factor applied to reconnect sleeps (0.0 disables jitter).
    pub jitter_factor: f64,
    /// TCP/TLS connect timeout for the streaming handshake, in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.scout.app/events".to_string(),
            token_param: "token".to_string(),
            initial_retry_delay_ms: scout_core::retry::DEFAULT_INITIAL_DELAY_MS,
            max_retry_delay_ms: scout_core::retry::DEFAULT_MAX_DELAY_MS,
            jitter_factor: scout_core::retry::DEFAULT_JITTER_FACTOR,
            connect_timeout_ms: 10_000,
        }
    }
}

impl StreamSettings {
    /// Backoff policy derived from these settings.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            jitter_factor: self.jitter_factor,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "stream.endpoint must not be empty".into(),
            ));
        }
        if self.token_param.is_empty() {
            return Err(SettingsError::InvalidValue(
                "stream.tokenParam must not be empty".into(),
            ));
        }
        if self.initial_retry_delay_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "stream.initialRetryDelayMs must be positive".into(),
            ));
        }
        if self.max_retry_delay_ms < self.initial_retry_delay_ms {
            return Err(SettingsError::InvalidValue(format!(
                "stream.maxRetryDelayMs ({}) is below initialRetryDelayMs ({})",
                self.max_retry_delay_ms, self.initial_retry_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(SettingsError::InvalidValue(format!(
                "stream.jitterFactor ({}) must be within 0.0..=1.0",
                self.jitter_factor
            )));
        }
        Ok(())
    }
}

/// Network reachability probe settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReachabilitySettings {
    /// Whether to run the TCP reachability probe at all.
    pub enabled: bool,
    /// Interval between probes, in milliseconds.
    pub probe_interval_ms: u64,
    /// Timeout for a single probe connection, in milliseconds.
    pub probe_timeout_ms: u64,
}

impl Default for ReachabilitySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_interval_ms: 5_000,
            probe_timeout_ms: 3_000,
        }
    }
}

impl ReachabilitySettings {
    fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.probe_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "reachability.probeIntervalMs must be positive".into(),
            ));
        }
        if self.probe_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "reachability.probeTimeoutMs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
