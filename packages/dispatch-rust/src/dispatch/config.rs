use std::time::Duration;

use serde::Deserialize;

use super::error::DispatchError;

/// Dispatcher settings.
///
/// Controls dispatch deadlines, concurrency limits, shutdown draining, and
/// logging. Every field has a default, so partial documents deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Deadline for a root dispatch in milliseconds. `0` disables it.
    pub dispatch_timeout_ms: u64,
    /// Maximum number of concurrent root dispatches before load shedding.
    pub max_concurrent_dispatches: u32,
    /// How long `Mediator::shutdown_gracefully` waits for in-flight dispatches.
    pub drain_timeout_ms: u64,
    /// Entry capacity of caching filters built from this configuration.
    pub cache_capacity: usize,
    pub log: LogConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout_ms: 30_000,
            max_concurrent_dispatches: 1000,
            drain_timeout_ms: 30_000,
            cache_capacity: 1024,
            log: LogConfig::default(),
        }
    }
}

impl DispatchConfig {
    /// Parses settings from JSON; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the document is malformed or a limit is zero.
    pub fn from_json(json: &str) -> Result<Self, DispatchError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| DispatchError::Configuration(format!("invalid dispatch config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns `Configuration` if `max_concurrent_dispatches` or
    /// `cache_capacity` is zero.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.max_concurrent_dispatches == 0 {
            return Err(DispatchError::Configuration(
                "max_concurrent_dispatches must be at least 1".to_string(),
            ));
        }
        if self.cache_capacity == 0 {
            return Err(DispatchError::Configuration(
                "cache_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn dispatch_timeout(&self) -> Option<Duration> {
        (self.dispatch_timeout_ms > 0).then(|| Duration::from_millis(self.dispatch_timeout_ms))
    }

    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Settings for [`init_tracing`](crate::telemetry::init_tracing).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives, e.g. `"info,conduit_dispatch=debug"`.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
