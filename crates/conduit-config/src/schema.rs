//! Configuration sections.

use std::path::PathBuf;
use std::time::Duration;

use conduit_server::ServerConfig;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// HTTP server settings.
///
/// Converted into the runtime [`ServerConfig`] with
/// [`to_server_config`](Self::to_server_config).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    /// Listen address.
    pub http_addr: String,

    /// Per-request deadline in milliseconds; `None` disables it.
    pub request_timeout_ms: Option<u64>,

    /// Drain window on shutdown, in seconds.
    pub shutdown_timeout_secs: u64,

    /// Request body limit in bytes.
    pub max_body_bytes: usize,

    /// Concurrent connection limit.
    pub max_connections: Option<usize>,

    /// HTTP/1.1 keep-alive.
    pub keep_alive: bool,

    /// Whether HTTP/2 is negotiated.
    pub http2_enabled: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for ServerSection {
    fn from(config: &ServerConfig) -> Self {
        Self {
            http_addr: config.http_addr().to_string(),
            request_timeout_ms: config
                .request_timeout()
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            shutdown_timeout_secs: config.shutdown_timeout().as_secs(),
            max_body_bytes: config.max_body_bytes(),
            max_connections: config.max_connections(),
            keep_alive: config.keep_alive(),
            http2_enabled: config.http2_enabled(),
        }
    }
}

impl ServerSection {
    /// The runtime server configuration.
    #[must_use]
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig::builder()
            .http_addr(self.http_addr.clone())
            .request_timeout(self.request_timeout_ms.map(Duration::from_millis))
            .shutdown_timeout(Duration::from_secs(self.shutdown_timeout_secs))
            .max_body_bytes(self.max_body_bytes)
            .max_connections(self.max_connections)
            .keep_alive(self.keep_alive)
            .http2_enabled(self.http2_enabled)
            .build()
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.http_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "server.http_addr",
                format!("invalid socket address: {}", self.http_addr),
            ));
        }
        if self.request_timeout_ms == Some(0) {
            return Err(ConfigError::invalid_value(
                "server.request_timeout_ms",
                "must be positive; omit it to disable the deadline",
            ));
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigError::invalid_value("server.max_body_bytes", "must be positive"));
        }
        if self.max_connections == Some(0) {
            return Err(ConfigError::invalid_value("server.max_connections", "must be positive"));
        }
        Ok(())
    }
}

/// Which cache variant backs the cache manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// In-process map.
    #[default]
    Memory,
    /// Files under [`CacheSection::dir`].
    File,
    /// No cache manager.
    Disabled,
}

/// Cache manager settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSection {
    /// Backend variant.
    pub backend: CacheBackend,

    /// Directory for the file backend.
    pub dir: Option<PathBuf>,

    /// TTL applied when none is given, in seconds.
    pub default_ttl_secs: Option<u64>,

    /// Entry limit of the memory backend.
    pub max_entries: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            dir: None,
            default_ttl_secs: None,
            max_entries: 10_000,
        }
    }
}

impl CacheSection {
    /// The default TTL as a duration.
    #[must_use]
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == CacheBackend::File && self.dir.is_none() {
            return Err(ConfigError::invalid_value(
                "cache.dir",
                "required when backend is `file`",
            ));
        }
        if self.max_entries == 0 {
            return Err(ConfigError::invalid_value("cache.max_entries", "must be positive"));
        }
        Ok(())
    }
}

/// Cookie session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSection {
    /// Whether a session store is built over the cache.
    pub enabled: bool,

    /// Cookie carrying the session ID.
    pub cookie_name: String,

    /// Idle lifetime of a session, in seconds.
    pub ttl_secs: u64,

    /// Adds `Secure` to the cookie.
    pub secure: bool,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            enabled: false,
            cookie_name: "conduit_session".to_string(),
            ttl_secs: 30 * 60,
            secure: false,
        }
    }
}

impl SessionSection {
    /// The idle lifetime as a duration.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub(crate) fn validate(&self, cache: &CacheSection) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if cache.backend == CacheBackend::Disabled {
            return Err(ConfigError::invalid_value(
                "session.enabled",
                "sessions are stored in the cache, which is disabled",
            ));
        }
        let valid_name = !self.cookie_name.is_empty()
            && self
                .cookie_name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if !valid_name {
            return Err(ConfigError::invalid_value(
                "session.cookie_name",
                format!("`{}` is not a valid cookie name", self.cookie_name),
            ));
        }
        if self.ttl_secs == 0 {
            return Err(ConfigError::invalid_value("session.ttl_secs", "must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_section_round_trips_runtime_defaults() {
        let section = ServerSection::default();
        assert_eq!(section.http_addr, "0.0.0.0:8080");
        assert_eq!(section.request_timeout_ms, Some(30_000));
        assert_eq!(section.to_server_config(), ServerConfig::default());
    }

    #[test]
    fn test_server_section_conversion() {
        let section = ServerSection {
            http_addr: "127.0.0.1:3000".into(),
            request_timeout_ms: None,
            max_connections: Some(64),
            ..ServerSection::default()
        };
        let config = section.to_server_config();
        assert_eq!(config.http_addr(), "127.0.0.1:3000");
        assert_eq!(config.request_timeout(), None);
        assert_eq!(config.max_connections(), Some(64));
    }

    #[test]
    fn test_server_validation() {
        let bad = ServerSection {
            http_addr: "localhost".into(),
            ..ServerSection::default()
        };
        assert!(matches!(bad.validate(), Err(ConfigError::InvalidValue { ref field, .. }) if field == "server.http_addr"));

        let bad = ServerSection {
            request_timeout_ms: Some(0),
            ..ServerSection::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_file_cache_needs_dir() {
        let cache = CacheSection {
            backend: CacheBackend::File,
            ..CacheSection::default()
        };
        assert!(cache.validate().is_err());

        let cache = CacheSection {
            dir: Some("/var/cache/conduit".into()),
            ..cache
        };
        assert!(cache.validate().is_ok());
    }

    #[test]
    fn test_sessions_need_a_cache() {
        let session = SessionSection {
            enabled: true,
            ..SessionSection::default()
        };
        assert!(session.validate(&CacheSection::default()).is_ok());

        let disabled = CacheSection {
            backend: CacheBackend::Disabled,
            ..CacheSection::default()
        };
        assert!(session.validate(&disabled).is_err());

        let session = SessionSection {
            cookie_name: "bad name;".into(),
            ..session
        };
        assert!(session.validate(&CacheSection::default()).is_err());
    }
}
