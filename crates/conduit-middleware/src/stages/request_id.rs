//! Request ID response header.
//!
//! Every context already carries a freshly generated UUID v7 request ID. This
//! middleware exposes it to the client as `x-request-id` so support requests
//! can be correlated with server logs. Incoming `x-request-id` headers are
//! ignored: the ID also partitions the request-scoped cache, so it must never
//! be chosen by the caller.

use conduit_core::{BoxFuture, Context, Result};
use http::header::{HeaderName, HeaderValue};

use crate::middleware::{Middleware, Next};

/// The header name for request ID propagation.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Adds `x-request-id` to successful responses.
///
/// Error responses are rebuilt by the error handler and carry the ID in the
/// envelope's `request_id` field instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdHeader;

impl RequestIdHeader {
    /// Creates the middleware.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for RequestIdHeader {
    fn name(&self) -> &'static str {
        "request_id"
    }

    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let result = next.run(ctx).await;
            if let Ok(value) = HeaderValue::from_str(&ctx.request_id().to_string()) {
                ctx.set_header(HeaderName::from_static(REQUEST_ID_HEADER), value);
            }
            result
        })
    }
}
