//! Logging and metrics for Conduit services.
//!
//! - **Logging**: a `tracing-subscriber` registry with an env filter and
//!   JSON, pretty or compact output
//! - **Metrics**: [`FacadeMetrics`], the `Metrics` manager backed by the
//!   `metrics` crate, and a Prometheus recorder whose exposition is served on
//!   a dedicated listener or mounted as a route
//!
//! # Example
//!
//! ```rust,no_run
//! use conduit_server::Framework;
//! use conduit_telemetry::{init_telemetry, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TelemetryConfig::builder()
//!         .service_name("orders")
//!         .environment("production")
//!         .build();
//!     let telemetry = init_telemetry(&config)?;
//!
//!     let mut app = Framework::default();
//!     telemetry.mount(&mut app);
//!     app.listen().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::{TelemetryConfig, TelemetryConfigBuilder};
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogFormat};
pub use metrics::{build_recorder, install_prometheus, FacadeMetrics, MetricsConfig, MetricsRegistry};

use conduit_server::Framework;

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// What [`init_telemetry`] installed.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    registry: Option<MetricsRegistry>,
    endpoint: Option<String>,
}

impl Telemetry {
    /// The Prometheus registry, when metrics are enabled.
    #[must_use]
    pub fn registry(&self) -> Option<&MetricsRegistry> {
        self.registry.as_ref()
    }

    /// Registers `GET <endpoint>` serving the exposition.
    ///
    /// Does nothing when metrics are disabled or served on a dedicated
    /// listener.
    pub fn mount(&self, framework: &mut Framework) {
        if let (Some(registry), Some(endpoint)) = (&self.registry, &self.endpoint) {
            framework.get(endpoint, registry.handler());
        }
    }
}

/// Installs logging, then the Prometheus recorder.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<Telemetry> {
    init_logging(&config.logging)?;
    let registry = install_prometheus(&config.metrics)?;
    let endpoint = match (&registry, &config.metrics.listen_addr) {
        (Some(_), None) => Some(config.metrics.endpoint.clone()),
        _ => None,
    };

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = %config.environment,
        metrics = registry.is_some(),
        "telemetry initialized"
    );
    Ok(Telemetry { registry, endpoint })
}
