//! Prometheus metrics.
//!
//! [`FacadeMetrics`] is the [`Metrics`] manager that forwards measurements to
//! the `metrics` crate. [`install_prometheus`] installs a Prometheus recorder
//! as the global `metrics` recorder and returns a [`MetricsRegistry`] that
//! renders the exposition text, either on its own listener or through a
//! route on the application.
//!
//! # Standard metrics
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `conduit_requests_total` | Counter | `method`, `route`, `status` |
//! | `conduit_request_duration_seconds` | Histogram | `method`, `route`, `status` |
//! | `conduit_in_flight_requests` | Gauge | - |

use std::net::SocketAddr;

use bytes::Bytes;
use conduit_core::managers::{Labels, Metrics};
use conduit_middleware::stages::{REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};
use conduit_middleware::{handler_fn, Handler};
use conduit_server::IN_FLIGHT_REQUESTS;
use http::StatusCode;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Label};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use serde::{Deserialize, Serialize};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Prometheus text exposition content type.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    /// Whether a recorder is installed.
    pub enabled: bool,

    /// Dedicated exporter address, e.g. `0.0.0.0:9090`. When unset the
    /// exposition is served through [`MetricsRegistry::handler`].
    pub listen_addr: Option<String>,

    /// Path the application mounts the exposition handler on.
    pub endpoint: String,

    /// Histogram buckets for request duration, in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: None,
            endpoint: "/metrics".to_string(),
            duration_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        }
    }
}

impl MetricsConfig {
    /// Checks the endpoint path and bucket layout.
    pub fn validate(&self) -> TelemetryResult<()> {
        if !self.endpoint.starts_with('/') {
            return Err(TelemetryError::InvalidConfig(format!(
                "metrics endpoint `{}` must start with `/`",
                self.endpoint
            )));
        }
        if self.duration_buckets.is_empty() {
            return Err(TelemetryError::InvalidConfig(
                "duration_buckets must not be empty".to_string(),
            ));
        }
        if self.duration_buckets.windows(2).any(|w| w[0] >= w[1]) {
            return Err(TelemetryError::InvalidConfig(
                "duration_buckets must be strictly increasing".to_string(),
            ));
        }
        if let Some(addr) = &self.listen_addr {
            parse_addr(addr)?;
        }
        Ok(())
    }
}

fn parse_addr(addr: &str) -> TelemetryResult<SocketAddr> {
    addr.parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{addr}: {e}")))
}

/// Forwards [`Metrics`] calls to the global `metrics` recorder.
///
/// With no recorder installed every call is discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct FacadeMetrics;

impl FacadeMetrics {
    /// Creates the manager.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn to_labels(labels: Labels<'_>) -> Vec<Label> {
    labels
        .iter()
        .map(|(key, value)| Label::new(*key, value.clone()))
        .collect()
}

impl Metrics for FacadeMetrics {
    fn increment(&self, name: &'static str, labels: Labels<'_>) {
        counter!(name, to_labels(labels)).increment(1);
    }

    fn record(&self, name: &'static str, value: f64, labels: Labels<'_>) {
        histogram!(name, to_labels(labels)).record(value);
    }

    fn gauge(&self, name: &'static str, value: f64, labels: Labels<'_>) {
        gauge!(name, to_labels(labels)).set(value);
    }
}

/// Renders the Prometheus exposition of an installed recorder.
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    handle: PrometheusHandle,
}

impl MetricsRegistry {
    /// Wraps a recorder handle.
    #[must_use]
    pub fn new(handle: PrometheusHandle) -> Self {
        Self { handle }
    }

    /// The exposition text.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// A handler that writes the exposition text.
    pub fn handler(&self) -> impl Handler {
        let handle = self.handle.clone();
        handler_fn(move |ctx| {
            let body = handle.render();
            Box::pin(async move {
                ctx.response_mut()
                    .write(StatusCode::OK, PROMETHEUS_CONTENT_TYPE, Bytes::from(body));
                Ok(())
            })
        })
    }
}

/// Builds a Prometheus recorder with the configured histogram buckets.
///
/// The recorder is not installed; use it with `metrics::with_local_recorder`
/// or hand it to [`install_prometheus`].
pub fn build_recorder(config: &MetricsConfig) -> TelemetryResult<PrometheusRecorder> {
    Ok(prometheus_builder(config)?.build_recorder())
}

fn prometheus_builder(config: &MetricsConfig) -> TelemetryResult<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(REQUEST_DURATION_SECONDS.to_string()),
            &config.duration_buckets,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Installs the Prometheus recorder globally.
///
/// Returns `None` when metrics are disabled. With `listen_addr` set the
/// exporter's own HTTP listener is spawned, which requires a Tokio runtime.
pub fn install_prometheus(config: &MetricsConfig) -> TelemetryResult<Option<MetricsRegistry>> {
    if !config.enabled {
        return Ok(None);
    }
    config.validate()?;

    let handle = match &config.listen_addr {
        Some(addr) => {
            let addr = parse_addr(addr)?;
            let (recorder, exporter) = prometheus_builder(config)?
                .with_http_listener(addr)
                .build()
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
            let handle = recorder.handle();
            metrics::set_global_recorder(recorder)
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
            tokio::spawn(async move {
                if let Err(error) = exporter.await {
                    tracing::error!(error = ?error, "prometheus exporter stopped");
                }
            });
            tracing::info!(addr = %addr, "prometheus exporter listening");
            handle
        }
        None => prometheus_builder(config)?
            .install_recorder()
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?,
    };

    describe_standard_metrics();
    Ok(Some(MetricsRegistry::new(handle)))
}

fn describe_standard_metrics() {
    describe_counter!(REQUESTS_TOTAL, "Total number of HTTP requests handled");
    describe_histogram!(
        REQUEST_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "HTTP request duration in seconds"
    );
    describe_gauge!(IN_FLIGHT_REQUESTS, "HTTP requests currently being handled");
}
