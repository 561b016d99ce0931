//! Access logging and request metrics.
//!
//! Emits one structured `tracing` event per request once the inner chain has
//! finished, and records request metrics through the context's
//! [`Metrics`](conduit_core::managers::Metrics) manager.
//!
//! # Metrics Emitted
//!
//! - `conduit_requests_total` - counter labelled by method, route and status
//! - `conduit_request_duration_seconds` - latency, same labels
//!
//! # Log Fields
//!
//! `request_id`, `method`, `path`, `route`, `status`, `duration_ms` and, when
//! the caller was authenticated, `principal`.

use std::time::Instant;

use conduit_core::{BoxFuture, Context, Result};
use tracing::Level;

use crate::middleware::{Middleware, Next};

/// Counter of completed requests.
pub const REQUESTS_TOTAL: &str = "conduit_requests_total";
/// Request latency in seconds.
pub const REQUEST_DURATION_SECONDS: &str = "conduit_request_duration_seconds";

/// Logs every request and records request metrics.
#[derive(Debug, Clone)]
pub struct AccessLog {
    level: Level,
    record_metrics: bool,
}

impl Default for AccessLog {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            record_metrics: true,
        }
    }
}

impl AccessLog {
    /// Logs at `INFO` and records metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the level for successful requests. Failures always log at `WARN`
    /// (client errors) or `ERROR` (server errors).
    #[must_use]
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Turns metric recording off.
    #[must_use]
    pub fn without_metrics(mut self) -> Self {
        self.record_metrics = false;
        self
    }

    fn emit(&self, ctx: &Context, status: u16, start: Instant) {
        let duration = start.elapsed();
        let duration_ms = duration.as_secs_f64() * 1000.0;
        let route = ctx.route().unwrap_or("unmatched");
        let principal = ctx.principal().map(|p| p.log_id());
        let principal = principal.as_deref().unwrap_or("-");

        macro_rules! access {
            ($mac:ident) => {
                tracing::$mac!(
                    request_id = %ctx.request_id(),
                    method = %ctx.method(),
                    path = ctx.path(),
                    route,
                    status,
                    duration_ms,
                    principal,
                    "request completed"
                )
            };
        }

        match status {
            s if s >= 500 => access!(error),
            s if s >= 400 => access!(warn),
            _ => match self.level {
                Level::ERROR => access!(error),
                Level::WARN => access!(warn),
                Level::INFO => access!(info),
                Level::DEBUG => access!(debug),
                _ => access!(trace),
            },
        }

        if self.record_metrics {
            let labels = [
                ("method", ctx.method().to_string()),
                ("route", route.to_string()),
                ("status", status.to_string()),
            ];
            let metrics = ctx.metrics();
            metrics.increment(REQUESTS_TOTAL, &labels);
            metrics.record(REQUEST_DURATION_SECONDS, duration.as_secs_f64(), &labels);
        }
    }
}

impl Middleware for AccessLog {
    fn name(&self) -> &'static str {
        "access_log"
    }

    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let start = Instant::now();
            let result = next.run(ctx).await;
            let status = match &result {
                Ok(()) => ctx.response().status(),
                Err(error) => error.status(),
            };
            self.emit(ctx, status.as_u16(), start);
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::middleware::handler_fn;
    use bytes::Bytes;
    use conduit_core::managers::{Labels, Managers, Metrics};
    use conduit_core::{ContextFactory, Error};
    use http::StatusCode;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorded {
        counters: Mutex<Vec<(String, Vec<(&'static str, String)>)>>,
        timings: Mutex<Vec<&'static str>>,
    }

    struct Recorder(Arc<Recorded>);

    impl Metrics for Recorder {
        fn increment(&self, name: &'static str, labels: Labels<'_>) {
            self.0
                .counters
                .lock()
                .unwrap()
                .push((name.to_string(), labels.to_vec()));
        }

        fn record(&self, name: &'static str, _value: f64, _labels: Labels<'_>) {
            self.0.timings.lock().unwrap().push(name);
        }
    }

    async fn run(status: Option<StatusCode>) -> Arc<Recorded> {
        let recorded = Arc::new(Recorded::default());
        let managers = Managers::builder()
            .metrics(Recorder(Arc::clone(&recorded)))
            .build();
        let factory = ContextFactory::new(Arc::new(managers));

        let handler: Arc<dyn crate::Handler> = match status {
            Some(status) => Arc::new(handler_fn(move |ctx| {
                Box::pin(async move {
                    ctx.text(status, "done");
                    Ok(())
                })
            })),
            None => Arc::new(handler_fn(|_ctx| {
                Box::pin(async { Err::<(), _>(Error::internal("boom")) })
            })),
        };
        let chain = Chain::new(&[Arc::new(AccessLog::new())], &[], handler);

        let mut ctx = factory.build(http::Request::get("/orders").body(Bytes::new()).unwrap(), None);
        ctx.set_route("/orders", conduit_core::Params::new());
        let _ = chain.run(&mut ctx).await;
        recorded
    }

    #[tokio::test]
    async fn test_records_metrics_with_labels() {
        let recorded = run(Some(StatusCode::CREATED)).await;
        let counters = recorded.counters.lock().unwrap();
        assert_eq!(counters.len(), 1);
        assert_eq!(counters[0].0, REQUESTS_TOTAL);
        assert!(counters[0].1.contains(&("route", "/orders".to_string())));
        assert!(counters[0].1.contains(&("status", "201".to_string())));
        assert_eq!(*recorded.timings.lock().unwrap(), vec![REQUEST_DURATION_SECONDS]);
    }

    #[tokio::test]
    async fn test_failed_request_uses_error_status() {
        let recorded = run(None).await;
        let counters = recorded.counters.lock().unwrap();
        assert!(counters[0].1.contains(&("status", "500".to_string())));
    }
}
