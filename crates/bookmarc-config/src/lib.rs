//! Configuration for the bookmarc event runtime.
//!
//! One [`BusConfig`] covers a whole context: dispatcher timeouts, the
//! pre-ready queue, breaker tuning, and bridge retry behavior. Every field
//! has a default, so an empty TOML file (or no file at all) yields a
//! working configuration. `BOOKMARC_*` environment variables override
//! file values and defaults; validation runs last, so an override cannot
//! smuggle in an inert setting. Durations are stored as integer
//! milliseconds in the file and exposed as [`Duration`] accessors.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level runtime configuration for one execution context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusConfig {
    /// Per-handler invocation timeout in milliseconds.
    pub handler_timeout_ms: u64,
    pub queue: QueueConfig,
    pub breaker: BreakerConfig,
    pub bridge: BridgeConfig,
}

/// Pre-ready queue tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Maximum buffered envelopes before the oldest is dropped.
    pub capacity: usize,
    /// Maximum age in milliseconds before a buffered envelope is dropped.
    pub max_age_ms: u64,
}

/// Circuit breaker tuning, shared by all tracked components.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerConfig {
    /// Consecutive failures before a component's breaker opens.
    pub failure_threshold: u32,
    /// Initial open duration in milliseconds.
    pub cooldown_ms: u64,
    /// Cap in milliseconds for the doubling cooldown.
    pub max_cooldown_ms: u64,
}

/// Cross-context bridge retry and response tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Delivery attempts per send, including the first.
    pub max_attempts: u32,
    /// Delay in milliseconds before the first retry.
    pub base_delay_ms: u64,
    /// Cap in milliseconds for the exponential retry delay.
    pub max_delay_ms: u64,
    /// How long in milliseconds a correlated request waits for its reply.
    pub request_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            handler_timeout_ms: 5_000,
            queue: QueueConfig::default(),
            breaker: BreakerConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            max_age_ms: 300_000,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 30_000,
            max_cooldown_ms: 300_000,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            request_timeout_ms: 5_000,
        }
    }
}

impl BusConfig {
    /// Load from a TOML file, apply `BOOKMARC_*` env overrides, validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.apply_env_overrides()?;
        config.validate()?;
        debug!(path = %path.display(), "loaded bus configuration");
        Ok(config)
    }

    /// Load from a TOML file, falling back to defaults when the file is
    /// absent. Env overrides apply either way; parse and validation
    /// failures still error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            warn!(path = %path.display(), "config file not found, using defaults");
            let mut config = Self::default();
            config.apply_env_overrides()?;
            config.validate()?;
            Ok(config)
        }
    }

    /// Apply `BOOKMARC_*` environment variables on top of current values.
    ///
    /// An unset variable leaves its field untouched; a set but
    /// unparseable one is an error rather than a silent fallback.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        env_override("BOOKMARC_HANDLER_TIMEOUT_MS", &mut self.handler_timeout_ms)?;
        env_override("BOOKMARC_QUEUE_CAPACITY", &mut self.queue.capacity)?;
        env_override("BOOKMARC_QUEUE_MAX_AGE_MS", &mut self.queue.max_age_ms)?;
        env_override(
            "BOOKMARC_BREAKER_FAILURE_THRESHOLD",
            &mut self.breaker.failure_threshold,
        )?;
        env_override("BOOKMARC_BREAKER_COOLDOWN_MS", &mut self.breaker.cooldown_ms)?;
        env_override(
            "BOOKMARC_BREAKER_MAX_COOLDOWN_MS",
            &mut self.breaker.max_cooldown_ms,
        )?;
        env_override("BOOKMARC_BRIDGE_MAX_ATTEMPTS", &mut self.bridge.max_attempts)?;
        env_override("BOOKMARC_BRIDGE_BASE_DELAY_MS", &mut self.bridge.base_delay_ms)?;
        env_override("BOOKMARC_BRIDGE_MAX_DELAY_MS", &mut self.bridge.max_delay_ms)?;
        env_override(
            "BOOKMARC_BRIDGE_REQUEST_TIMEOUT_MS",
            &mut self.bridge.request_timeout_ms,
        )?;
        Ok(())
    }

    /// Reject configurations that would make the runtime inert or unsound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.handler_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "handler_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.queue.capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue.capacity must be greater than zero".into(),
            ));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "breaker.failure_threshold must be greater than zero".into(),
            ));
        }
        if self.breaker.max_cooldown_ms < self.breaker.cooldown_ms {
            return Err(ConfigError::Invalid(
                "breaker.max_cooldown_ms must be at least breaker.cooldown_ms".into(),
            ));
        }
        if self.bridge.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "bridge.max_attempts must be greater than zero".into(),
            ));
        }
        if self.bridge.max_delay_ms < self.bridge.base_delay_ms {
            return Err(ConfigError::Invalid(
                "bridge.max_delay_ms must be at least bridge.base_delay_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }
}

fn env_override<T: std::str::FromStr>(name: &str, slot: &mut T) -> Result<(), ConfigError> {
    let Ok(raw) = std::env::var(name) else {
        return Ok(());
    };
    *slot = raw.parse().map_err(|_| {
        ConfigError::Invalid(format!("environment override {name} has invalid value {raw:?}"))
    })?;
    debug!(var = name, value = %raw, "applied environment override");
    Ok(())
}

impl QueueConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }
}

impl BreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn max_cooldown(&self) -> Duration {
        Duration::from_millis(self.max_cooldown_ms)
    }
}

impl BridgeConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    /// Sets env vars for one test and removes them on drop, so a failing
    /// assertion cannot leak overrides into the next test.
    struct EnvVars(Vec<&'static str>);

    impl EnvVars {
        fn set(pairs: &[(&'static str, &str)]) -> Self {
            for (name, value) in pairs {
                std::env::set_var(name, value);
            }
            Self(pairs.iter().map(|(name, _)| *name).collect())
        }
    }

    impl Drop for EnvVars {
        fn drop(&mut self) {
            for name in &self.0 {
                std::env::remove_var(name);
            }
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = BusConfig::default();
        config.validate().unwrap();
        assert_eq!(config.handler_timeout(), Duration::from_secs(5));
        assert_eq!(config.queue.capacity, 256);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.bridge.max_attempts, 3);
    }

    #[test]
    #[serial]
    fn test_load_partial_file_fills_defaults() {
        let file = write_config(
            r#"
            handler_timeout_ms = 2000

            [queue]
            capacity = 32

            [bridge]
            max_attempts = 5
            "#,
        );

        let config = BusConfig::load(file.path()).unwrap();
        assert_eq!(config.handler_timeout_ms, 2000);
        assert_eq!(config.queue.capacity, 32);
        // Untouched sections keep their defaults.
        assert_eq!(config.queue.max_age_ms, 300_000);
        assert_eq!(config.breaker.cooldown_ms, 30_000);
        assert_eq!(config.bridge.max_attempts, 5);
        assert_eq!(config.bridge.base_delay_ms, 100);
    }

    #[test]
    #[serial]
    fn test_load_rejects_unknown_field() {
        let file = write_config("handler_timout_ms = 2000\n");
        assert!(matches!(
            BusConfig::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_validate_rejects_zero_capacity() {
        let file = write_config("[queue]\ncapacity = 0\n");
        assert!(matches!(
            BusConfig::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_validate_rejects_inverted_cooldown_bounds() {
        let config = BusConfig {
            breaker: BreakerConfig {
                cooldown_ms: 60_000,
                max_cooldown_ms: 1_000,
                ..BreakerConfig::default()
            },
            ..BusConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = BusConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.handler_timeout_ms, 5_000);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file_values() {
        let file = write_config("handler_timeout_ms = 2000\n");
        let _vars = EnvVars::set(&[
            ("BOOKMARC_HANDLER_TIMEOUT_MS", "750"),
            ("BOOKMARC_QUEUE_CAPACITY", "64"),
            ("BOOKMARC_BRIDGE_MAX_ATTEMPTS", "7"),
        ]);

        let config = BusConfig::load(file.path()).unwrap();

        // Env beats both the file value and the default.
        assert_eq!(config.handler_timeout_ms, 750);
        assert_eq!(config.queue.capacity, 64);
        assert_eq!(config.bridge.max_attempts, 7);
        // Untouched fields keep their file/default values.
        assert_eq!(config.breaker.failure_threshold, 5);
    }

    #[test]
    #[serial]
    fn test_env_overrides_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let _vars = EnvVars::set(&[("BOOKMARC_BREAKER_COOLDOWN_MS", "12000")]);

        let config = BusConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.breaker.cooldown(), Duration::from_millis(12_000));
    }

    #[test]
    #[serial]
    fn test_env_override_unparseable_value_errors() {
        let dir = tempfile::tempdir().unwrap();
        let _vars = EnvVars::set(&[("BOOKMARC_QUEUE_CAPACITY", "plenty")]);

        assert!(matches!(
            BusConfig::load_or_default(dir.path().join("absent.toml")),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    #[serial]
    fn test_env_override_validated() {
        let dir = tempfile::tempdir().unwrap();
        let _vars = EnvVars::set(&[("BOOKMARC_QUEUE_CAPACITY", "0")]);

        // Overrides run before validation, so an inert value still fails.
        assert!(matches!(
            BusConfig::load_or_default(dir.path().join("absent.toml")),
            Err(ConfigError::Invalid(_))
        ));
    }
}
