//! Proxy-wide defaults for caching, retry and pooling.
//!
//! Settings deserialize from JSON with every section optional; missing
//! values fall back to the defaults below. Durations are stored as integer
//! seconds or milliseconds and exposed as [`Duration`] through accessors.
//!
//! ```json
//! {
//!   "cache": { "ttl_seconds": 86400 },
//!   "retry": { "attempts": 5, "max_jitter_ms": 250 },
//!   "pool":  { "max_size": 4 },
//!   "rpc_timeout_ms": 10000
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Cache defaults applied when a call's cache options leave them out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_seconds: u64,
    /// Upper bound on the inline cache write-back.
    pub write_timeout_ms: u64,
    /// How long the in-process store keeps expired entries as stale fallbacks.
    pub stale_retention_seconds: u64,
    /// How often the in-process store sweeps expired entries. `0` disables the sweeper.
    pub sweep_interval_seconds: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_seconds: 3600,
            write_timeout_ms: 1000,
            stale_retention_seconds: 3600,
            sweep_interval_seconds: 60,
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn stale_retention(&self) -> Duration {
        Duration::from_secs(self.stale_retention_seconds)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_seconds > 0).then(|| Duration::from_secs(self.sweep_interval_seconds))
    }
}

/// Retry defaults applied when a call's retry options leave them out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_jitter_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_factor: 2.0,
            max_jitter_ms: 100,
        }
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn max_jitter(&self) -> Duration {
        Duration::from_millis(self.max_jitter_ms)
    }
}

/// Defaults for pools created by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub max_size: usize,
    pub max_idle_seconds: u64,
    pub acquire_timeout_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 10,
            max_idle_seconds: 30,
            acquire_timeout_ms: 5000,
        }
    }
}

impl PoolSettings {
    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_seconds)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// All proxy defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub cache: CacheSettings,
    pub retry: RetrySettings,
    pub pool: PoolSettings,
    /// Deadline for RPC calls that carry none of their own.
    pub rpc_timeout_ms: u64,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            cache: CacheSettings::default(),
            retry: RetrySettings::default(),
            pool: PoolSettings::default(),
            rpc_timeout_ms: 30_000,
        }
    }
}

impl ProxySettings {
    pub fn rpc_timeout(&self) -> Option<Duration> {
        (self.rpc_timeout_ms > 0).then(|| Duration::from_millis(self.rpc_timeout_ms))
    }

    /// Parses and validates settings from a JSON document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Settings`] on malformed JSON or invalid values.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let settings: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Settings(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads, parses and validates settings from a JSON file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Settings`] if the file cannot be read or is invalid.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading proxy settings");
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Settings(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    /// Rejects values that would make the pipeline misbehave.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Settings`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.max_size == 0 {
            return Err(ConfigError::Settings("pool.max_size must be at least 1".into()));
        }
        if self.retry.attempts == 0 {
            return Err(ConfigError::Settings("retry.attempts must be at least 1".into()));
        }
        if !(self.retry.backoff_factor.is_finite() && self.retry.backoff_factor > 0.0) {
            return Err(ConfigError::Settings(
                "retry.backoff_factor must be a positive number".into(),
            ));
        }
        if self.cache.ttl_seconds == 0 {
            return Err(ConfigError::Settings("cache.ttl_seconds must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = ProxySettings::default();
        assert_eq!(s.cache.ttl(), Duration::from_secs(3600));
        assert_eq!(s.retry.attempts, 3);
        assert_eq!(s.pool.max_size, 10);
        assert_eq!(s.pool.max_idle(), Duration::from_secs(30));
        assert_eq!(s.rpc_timeout(), Some(Duration::from_secs(30)));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let s = ProxySettings::from_json_str(r#"{"retry":{"attempts":5},"pool":{"max_size":2}}"#)
            .unwrap();
        assert_eq!(s.retry.attempts, 5);
        assert_eq!(s.retry.base_delay(), Duration::from_millis(100));
        assert_eq!(s.pool.max_size, 2);
        assert_eq!(s.cache.ttl_seconds, 3600);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = ProxySettings::from_json_str(r#"{"pool":{"max_size":0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Settings(ref m) if m.contains("pool.max_size")));

        let err = ProxySettings::from_json_str(r#"{"retry":{"backoff_factor":-1.0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Settings(ref m) if m.contains("backoff_factor")));

        assert!(ProxySettings::from_json_str("not json").is_err());
    }

    #[test]
    fn zero_rpc_timeout_disables_the_default_deadline() {
        let s = ProxySettings::from_json_str(r#"{"rpc_timeout_ms":0}"#).unwrap();
        assert_eq!(s.rpc_timeout(), None);
    }

    #[test]
    fn missing_file_is_settings_error() {
        let err = ProxySettings::from_path("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Settings(_)));
    }
}
