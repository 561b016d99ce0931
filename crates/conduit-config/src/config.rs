//! The root configuration type.

use conduit_telemetry::{LogConfig, TelemetryConfig};
use serde::{Deserialize, Serialize};

use crate::{CacheSection, ConfigError, ServerSection, SessionSection};

/// Complete Conduit application configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to layer files and environment
/// variables over the defaults.
///
/// ```
/// use conduit_config::ConduitConfig;
///
/// let config = ConduitConfig::default();
/// assert_eq!(config.server.http_addr, "0.0.0.0:8080");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConduitConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerSection,

    /// Logging and metrics.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Cache manager.
    #[serde(default)]
    pub cache: CacheSection,

    /// Cookie sessions.
    #[serde(default)]
    pub session: SessionSection,
}

impl ConduitConfig {
    /// Checks every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.telemetry
            .metrics
            .validate()
            .map_err(|e| ConfigError::invalid_value("telemetry.metrics", e.to_string()))?;
        conduit_telemetry::logging::create_env_filter(&self.telemetry.logging.level)
            .map_err(|e| ConfigError::invalid_value("telemetry.logging.level", e.to_string()))?;
        self.cache.validate()?;
        self.session.validate(&self.cache)?;
        Ok(())
    }

    /// Local development: pretty debug logs, no request deadline.
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.telemetry.environment = "development".to_string();
        config.telemetry.logging = LogConfig::development();
        config.server.request_timeout_ms = None;
        config.server.shutdown_timeout_secs = 5;
        config
    }

    /// Production: JSON logs, secure session cookies, connection cap.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.telemetry.environment = "production".to_string();
        config.telemetry.logging = LogConfig::production();
        config.server.max_connections = Some(10_000);
        config.session.secure = true;
        config
    }
}
