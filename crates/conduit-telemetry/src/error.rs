//! Telemetry error types.

use thiserror::Error;

/// Errors raised while installing logging or metrics.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The metrics recorder or exporter could not be set up.
    #[error("failed to initialize metrics: {0}")]
    MetricsInit(String),

    /// The tracing subscriber could not be installed.
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),

    /// A configuration value is out of range.
    #[error("invalid telemetry configuration: {0}")]
    InvalidConfig(String),

    /// The exporter address does not parse.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TelemetryError::MetricsInit("recorder already installed".to_string());
        assert_eq!(
            err.to_string(),
            "failed to initialize metrics: recorder already installed"
        );

        let err = TelemetryError::InvalidAddress("nowhere: invalid socket address syntax".into());
        assert!(err.to_string().starts_with("invalid address: nowhere"));
    }
}
