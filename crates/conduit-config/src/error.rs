//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// Failed to read a configuration or `.env` file.
    #[error("failed to read {path}: {source}")]
    ReadError {
        /// Path to the file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file extension is neither `toml` nor `json`.
    #[error("unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    /// TOML parsing error.
    #[error("failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON parsing error, also raised when merged layers do not fit the schema.
    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// A `.env` file is malformed.
    #[error("failed to parse .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),

    /// An environment key under the prefix names no setting.
    #[error("unknown configuration key from environment: {var}")]
    UnknownKey {
        /// The variable name.
        var: String,
    },

    /// An environment value has the wrong shape.
    #[error("failed to parse environment variable {var}: {reason}")]
    EnvParse {
        /// The variable name.
        var: String,
        /// What was expected.
        reason: String,
    },

    /// A value is out of range or inconsistent.
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// Dotted path of the field.
        field: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// A missing-file error.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// A read error.
    pub fn read_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadError {
            path: path.into(),
            source,
        }
    }

    /// An environment parse error.
    pub fn env_parse(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnvParse {
            var: var.into(),
            reason: reason.into(),
        }
    }

    /// A validation error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_culprit() {
        let err = ConfigError::file_not_found("/etc/conduit/app.toml");
        assert!(err.to_string().contains("/etc/conduit/app.toml"));

        let err = ConfigError::env_parse("CONDUIT__SERVER__MAX_BODY_BYTES", "expected integer");
        assert!(err.to_string().contains("CONDUIT__SERVER__MAX_BODY_BYTES"));
        assert!(err.to_string().contains("expected integer"));

        let err = ConfigError::invalid_value("cache.dir", "required when backend is `file`");
        assert_eq!(
            err.to_string(),
            "invalid configuration value for cache.dir: required when backend is `file`"
        );
    }
}
