//! Configuration for the gate.

use crate::error::{GateError, GateResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable that overrides the configured store URL.
pub const STORE_URL_ENV: &str = "GATEWARDEN_STORE_URL";

/// Root configuration for the gate.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GateConfig {
    /// Global default rate-limit policy.
    pub gate: GateSection,

    /// Counter store configuration.
    pub store: StoreSection,

    /// Violation escalation configuration.
    pub escalation: EscalationConfig,
}

impl GateConfig {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, the TOML is malformed,
    /// or validation fails.
    pub fn load<P: AsRef<Path>>(path: P) -> GateResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| GateError::Config(format!("failed to read config file: {e}")))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or validation fails.
    pub fn from_toml_str(content: &str) -> GateResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| GateError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides.
    ///
    /// When `GATEWARDEN_STORE_URL` is set and non-empty, it replaces the
    /// configured store URL and switches the backend to Redis.
    #[must_use]
    pub fn apply_env(mut self) -> Self {
        if let Ok(url) = std::env::var(STORE_URL_ENV) {
            if !url.is_empty() {
                self.store.url = url;
                self.store.backend = StoreBackend::Redis;
            }
        }
        self
    }

    /// Set the global default limit.
    #[must_use]
    pub fn with_default_limit(mut self, limit: u32) -> Self {
        self.gate.default_limit = limit;
        self
    }

    /// Set the global default window.
    #[must_use]
    pub fn with_default_window(mut self, window: Duration) -> Self {
        self.gate.default_window = window;
        self
    }

    /// Set the fallback mode for store outages.
    #[must_use]
    pub fn with_fallback(mut self, fallback: FallbackMode) -> Self {
        self.store.fallback = fallback;
        self
    }

    /// Set the escalation parameters.
    #[must_use]
    pub fn with_escalation(mut self, escalation: EscalationConfig) -> Self {
        self.escalation = escalation;
        self
    }

    /// Validate the configuration. Fails fast on values that would silently
    /// disable or distort limiting at request time.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Config`] describing the first invalid field.
    pub fn validate(&self) -> GateResult<()> {
        if self.gate.default_limit == 0 {
            return Err(GateError::Config(
                "gate.default_limit must be greater than 0".to_string(),
            ));
        }
        if self.gate.default_window.is_zero() {
            return Err(GateError::Config(
                "gate.default_window must be greater than 0".to_string(),
            ));
        }
        if self.store.backend == StoreBackend::Redis && self.store.url.is_empty() {
            return Err(GateError::Config(
                "store.url cannot be empty when backend is redis".to_string(),
            ));
        }
        if self.store.op_timeout.is_zero() {
            return Err(GateError::Config(
                "store.op_timeout must be greater than 0".to_string(),
            ));
        }
        if self.escalation.threshold == 0 {
            return Err(GateError::Config(
                "escalation.threshold must be greater than 0".to_string(),
            ));
        }
        if self.escalation.violation_window.is_zero() {
            return Err(GateError::Config(
                "escalation.violation_window must be greater than 0".to_string(),
            ));
        }
        if self.escalation.block_duration.is_zero() {
            return Err(GateError::Config(
                "escalation.block_duration must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Global default policy section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSection {
    /// Default requests allowed per window.
    pub default_limit: u32,

    /// Default window length.
    #[serde(with = "humantime_serde")]
    pub default_window: Duration,
}

impl Default for GateSection {
    fn default() -> Self {
        Self {
            default_limit: 100,
            default_window: Duration::from_secs(60),
        }
    }
}

/// Counter store section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Store backend.
    pub backend: StoreBackend,

    /// Connection URL for the networked backend.
    pub url: String,

    /// Prefix for all store keys.
    pub key_prefix: String,

    /// Per-operation time budget for the networked backend.
    #[serde(with = "humantime_serde")]
    pub op_timeout: Duration,

    /// Behavior while the networked backend is unreachable.
    pub fallback: FallbackMode,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "gatewarden".to_string(),
            op_timeout: Duration::from_millis(50),
            fallback: FallbackMode::FailOpen,
        }
    }
}

/// Backend for the counter store.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store. Single-instance deployments only.
    #[default]
    Memory,

    /// Redis-backed shared store.
    Redis,
}

/// Behavior while the shared store is unreachable.
///
/// `FailOpen` and `FailClosed` resolve every decision deterministically for
/// the duration of the outage; `Local` keeps limiting with the in-process
/// fallback store, which is correct per process but not across processes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackMode {
    /// Admit every request during the outage. A rate limiter outage should
    /// not become a full outage.
    #[default]
    FailOpen,

    /// Deny every request during the outage.
    FailClosed,

    /// Serve decisions from the in-process fallback store.
    Local,
}

/// Violation escalation section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Breaches within the violation window that trigger a block.
    pub threshold: u64,

    /// Window over which breaches are counted. Deliberately much longer than
    /// the rate-limit window so a single bursty window does not block on its
    /// own.
    #[serde(with = "humantime_serde")]
    pub violation_window: Duration,

    /// How long an escalated identity stays blocked.
    #[serde(with = "humantime_serde")]
    pub block_duration: Duration,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            violation_window: Duration::from_secs(600),
            block_duration: Duration::from_secs(900),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = GateConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gate.default_limit, 100);
        assert_eq!(config.gate.default_window, Duration::from_secs(60));
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.fallback, FallbackMode::FailOpen);
        assert_eq!(config.escalation.threshold, 5);
    }

    #[test]
    fn test_parse_toml() {
        let config = GateConfig::from_toml_str(
            r#"
            [gate]
            default_limit = 5
            default_window = "1m"

            [store]
            backend = "redis"
            url = "redis://cache:6379"
            op_timeout = "25ms"
            fallback = "fail-closed"

            [escalation]
            threshold = 3
            violation_window = "10m"
            block_duration = "15m"
            "#,
        )
        .unwrap();

        assert_eq!(config.gate.default_limit, 5);
        assert_eq!(config.gate.default_window, Duration::from_secs(60));
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.url, "redis://cache:6379");
        assert_eq!(config.store.op_timeout, Duration::from_millis(25));
        assert_eq!(config.store.fallback, FallbackMode::FailClosed);
        assert_eq!(config.escalation.threshold, 3);
        assert_eq!(config.escalation.block_duration, Duration::from_secs(900));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = GateConfig::from_toml_str(
            r#"
            [gate]
            default_limit = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.gate.default_limit, 10);
        assert_eq!(config.gate.default_window, Duration::from_secs(60));
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn test_validation_rejects_zero_limit() {
        let config = GateConfig::default().with_default_limit(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_window() {
        let config = GateConfig::default().with_default_window(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_empty_redis_url() {
        let mut config = GateConfig::default();
        config.store.backend = StoreBackend::Redis;
        config.store.url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_escalation_threshold() {
        let mut config = GateConfig::default();
        config.escalation.threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_override_switches_backend() {
        std::env::set_var(STORE_URL_ENV, "redis://override:6379");
        let config = GateConfig::default().apply_env();
        std::env::remove_var(STORE_URL_ENV);

        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.url, "redis://override:6379");
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = GateConfig::default()
            .with_default_limit(42)
            .with_fallback(FallbackMode::Local);

        let serialized = toml::to_string(&config).unwrap();
        let parsed = GateConfig::from_toml_str(&serialized).unwrap();

        assert_eq!(parsed.gate.default_limit, 42);
        assert_eq!(parsed.store.fallback, FallbackMode::Local);
    }
}
