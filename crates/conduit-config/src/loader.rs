//! Layered configuration loading.
//!
//! Layers apply in order, later ones overriding earlier ones:
//!
//! 1. defaults or a preset
//! 2. configuration files (TOML or JSON), merged key by key
//! 3. variables from a `.env` file
//! 4. process environment variables
//!
//! Variables use the form `PREFIX__SECTION__KEY`, e.g.
//! `CONDUIT__SERVER__HTTP_ADDR` or `CONDUIT__TELEMETRY__LOGGING__LEVEL`.

use std::path::{Path, PathBuf};

use conduit_telemetry::LogFormat;
use serde_json::Value;

use crate::{CacheBackend, ConduitConfig, ConfigError};

/// Default environment prefix.
pub const DEFAULT_ENV_PREFIX: &str = "CONDUIT";

/// Builds a [`ConduitConfig`] from layered sources.
///
/// ```no_run
/// use conduit_config::ConfigLoader;
///
/// # fn main() -> Result<(), conduit_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_production()
///     .with_optional_file("conduit.toml")?
///     .with_dotenv()?
///     .load()?;
/// # let _ = config;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    tree: Value,
    env_prefix: String,
    dotenv: Vec<(String, String)>,
    use_process_env: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Starts from [`ConduitConfig::default`] with the `CONDUIT` prefix.
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(&ConduitConfig::default())
    }

    fn from_config(config: &ConduitConfig) -> Self {
        Self {
            tree: serde_json::to_value(config).unwrap_or(Value::Null),
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            dotenv: Vec::new(),
            use_process_env: true,
        }
    }

    fn rebase(mut self, config: &ConduitConfig) -> Self {
        self.tree = serde_json::to_value(config).unwrap_or(Value::Null);
        self
    }

    /// Resets the base layer to the defaults.
    #[must_use]
    pub fn with_defaults(self) -> Self {
        self.rebase(&ConduitConfig::default())
    }

    /// Resets the base layer to [`ConduitConfig::development`].
    ///
    /// ```
    /// use conduit_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_development()
    ///     .without_process_env()
    ///     .load()
    ///     .unwrap();
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn with_development(self) -> Self {
        self.rebase(&ConduitConfig::development())
    }

    /// Resets the base layer to [`ConduitConfig::production`].
    #[must_use]
    pub fn with_production(self) -> Self {
        self.rebase(&ConduitConfig::production())
    }

    /// Merges a TOML or JSON file, chosen by extension.
    pub fn with_file(self, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;

        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| ConfigError::UnsupportedFormat(path.display().to_string()))?;
        tracing::debug!(path = %path.display(), "loading configuration file");
        self.with_string(&content, &format)
    }

    /// Merges the file if it exists.
    pub fn with_optional_file(self, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Merges configuration text in `format` (`toml` or `json`).
    ///
    /// ```
    /// use conduit_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("[server]\nhttp_addr = \"127.0.0.1:3000\"", "toml")
    ///     .unwrap()
    ///     .without_process_env()
    ///     .load()
    ///     .unwrap();
    /// assert_eq!(config.server.http_addr, "127.0.0.1:3000");
    /// assert_eq!(config.server.shutdown_timeout_secs, 30);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        let layer: Value = match format.to_ascii_lowercase().as_str() {
            "toml" => serde_json::to_value(toml::from_str::<toml::Value>(content)?)?,
            "json" => serde_json::from_str(content)?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };
        merge(&mut self.tree, layer);
        Ok(self)
    }

    /// Changes the environment prefix.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = prefix.to_ascii_uppercase();
        self
    }

    /// Reads `.env` from the working directory, if present.
    ///
    /// Variables are applied as a layer below the process environment; the
    /// process environment itself is not modified.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        self.read_dotenv(PathBuf::from(".env"), true)
    }

    /// Reads a specific `.env` file.
    pub fn with_dotenv_file(self, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        self.read_dotenv(path.as_ref().to_path_buf(), false)
    }

    fn read_dotenv(mut self, path: PathBuf, optional: bool) -> Result<Self, ConfigError> {
        let iter = match dotenvy::from_path_iter(&path) {
            Ok(iter) => iter,
            Err(e) if optional && e.not_found() => return Ok(self),
            Err(dotenvy::Error::Io(source)) => return Err(ConfigError::read_error(path, source)),
            Err(e) => return Err(e.into()),
        };
        for item in iter {
            self.dotenv.push(item?);
        }
        Ok(self)
    }

    /// Ignores the process environment.
    #[must_use]
    pub fn without_process_env(mut self) -> Self {
        self.use_process_env = false;
        self
    }

    /// Applies the environment layers and validates.
    pub fn load(self) -> Result<ConduitConfig, ConfigError> {
        let config = self.load_unvalidated()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies the environment layers without validating.
    pub fn load_unvalidated(self) -> Result<ConduitConfig, ConfigError> {
        let mut config: ConduitConfig = serde_json::from_value(self.tree)?;

        let prefix = format!("{}__", self.env_prefix);
        for (key, value) in &self.dotenv {
            if key.starts_with(&prefix) {
                apply_env_var(&mut config, key, value, &prefix)?;
            }
        }
        if self.use_process_env {
            let mut vars: Vec<(String, String)> = std::env::vars()
                .filter(|(key, _)| key.starts_with(&prefix))
                .collect();
            vars.sort();
            for (key, value) in &vars {
                apply_env_var(&mut config, key, value, &prefix)?;
            }
        }
        Ok(config)
    }
}

fn merge(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base), Value::Object(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

fn apply_env_var(
    config: &mut ConduitConfig,
    key: &str,
    value: &str,
    prefix: &str,
) -> Result<(), ConfigError> {
    let path = key
        .strip_prefix(prefix)
        .ok_or_else(|| ConfigError::env_parse(key, "missing prefix"))?;
    let parts: Vec<&str> = path.split("__").collect();

    let server = &mut config.server;
    let telemetry = &mut config.telemetry;
    let cache = &mut config.cache;
    let session = &mut config.session;

    match parts.as_slice() {
        ["SERVER", "HTTP_ADDR"] => server.http_addr = value.to_string(),
        ["SERVER", "REQUEST_TIMEOUT_MS"] => server.request_timeout_ms = parse_optional(key, value)?,
        ["SERVER", "SHUTDOWN_TIMEOUT_SECS"] => server.shutdown_timeout_secs = parse(key, value)?,
        ["SERVER", "MAX_BODY_BYTES"] => server.max_body_bytes = parse(key, value)?,
        ["SERVER", "MAX_CONNECTIONS"] => server.max_connections = parse_optional(key, value)?,
        ["SERVER", "KEEP_ALIVE"] => server.keep_alive = parse_bool(key, value)?,
        ["SERVER", "HTTP2_ENABLED"] => server.http2_enabled = parse_bool(key, value)?,

        ["TELEMETRY", "SERVICE_NAME"] => telemetry.service_name = value.to_string(),
        ["TELEMETRY", "SERVICE_VERSION"] => telemetry.service_version = value.to_string(),
        ["TELEMETRY", "ENVIRONMENT"] => telemetry.environment = value.to_string(),
        ["TELEMETRY", "LOGGING", "ENABLED"] => telemetry.logging.enabled = parse_bool(key, value)?,
        ["TELEMETRY", "LOGGING", "LEVEL"] => telemetry.logging.level = value.to_string(),
        ["TELEMETRY", "LOGGING", "FORMAT"] => {
            telemetry.logging.format = match value.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                "compact" => LogFormat::Compact,
                _ => return Err(ConfigError::env_parse(key, "expected json, pretty or compact")),
            };
        }
        ["TELEMETRY", "METRICS", "ENABLED"] => telemetry.metrics.enabled = parse_bool(key, value)?,
        ["TELEMETRY", "METRICS", "LISTEN_ADDR"] => {
            telemetry.metrics.listen_addr = non_empty(value);
        }
        ["TELEMETRY", "METRICS", "ENDPOINT"] => telemetry.metrics.endpoint = value.to_string(),

        ["CACHE", "BACKEND"] => {
            cache.backend = match value.to_ascii_lowercase().as_str() {
                "memory" => CacheBackend::Memory,
                "file" => CacheBackend::File,
                "disabled" | "none" => CacheBackend::Disabled,
                _ => return Err(ConfigError::env_parse(key, "expected memory, file or disabled")),
            };
        }
        ["CACHE", "DIR"] => cache.dir = non_empty(value).map(PathBuf::from),
        ["CACHE", "DEFAULT_TTL_SECS"] => cache.default_ttl_secs = parse_optional(key, value)?,
        ["CACHE", "MAX_ENTRIES"] => cache.max_entries = parse(key, value)?,

        ["SESSION", "ENABLED"] => session.enabled = parse_bool(key, value)?,
        ["SESSION", "COOKIE_NAME"] => session.cookie_name = value.to_string(),
        ["SESSION", "TTL_SECS"] => session.ttl_secs = parse(key, value)?,
        ["SESSION", "SECURE"] => session.secure = parse_bool(key, value)?,

        _ => return Err(ConfigError::UnknownKey { var: key.to_string() }),
    }
    Ok(())
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env_parse(key, "expected a non-negative integer"))
}

fn parse_optional<T: std::str::FromStr>(key: &str, value: &str) -> Result<Option<T>, ConfigError> {
    if value.is_empty() || value.eq_ignore_ascii_case("none") {
        Ok(None)
    } else {
        parse(key, value).map(Some)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::env_parse(key, "expected boolean")),
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}
