//! Metrics capability.

/// Label set attached to a measurement.
pub type Labels<'a> = &'a [(&'static str, String)];

/// Records request and application measurements.
///
/// Calls are synchronous and must not block; implementations forward to an
/// in-process registry.
pub trait Metrics: Send + Sync {
    /// Adds one to a counter.
    fn increment(&self, name: &'static str, labels: Labels<'_>);

    /// Records one observation of a histogram.
    fn record(&self, name: &'static str, value: f64, labels: Labels<'_>);

    /// Sets a gauge.
    fn gauge(&self, name: &'static str, value: f64, labels: Labels<'_>) {
        self.record(name, value, labels);
    }
}

/// A [`Metrics`] that discards everything. Used when none is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn increment(&self, _name: &'static str, _labels: Labels<'_>) {}

    fn record(&self, _name: &'static str, _value: f64, _labels: Labels<'_>) {}
}
