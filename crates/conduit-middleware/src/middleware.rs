//! Core middleware and handler traits.
//!
//! A [`Middleware`] receives the request [`Context`] and a [`Next`]
//! continuation. Code before `next.run(ctx)` is its pre-logic, code after it
//! is its post-logic, and returning without calling `next` short-circuits the
//! rest of the chain.
//!
//! # Example
//!
//! ```
//! use conduit_core::{BoxFuture, Context, Result};
//! use conduit_middleware::{Middleware, Next};
//! use http::{HeaderName, HeaderValue};
//!
//! struct Trace;
//!
//! impl Middleware for Trace {
//!     fn name(&self) -> &'static str {
//!         "trace"
//!     }
//!
//!     fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
//!         Box::pin(async move {
//!             let result = next.run(ctx).await;
//!             ctx.set_header(HeaderName::from_static("x-trace"), HeaderValue::from_static("1"));
//!             result
//!         })
//!     }
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use conduit_core::{BoxFuture, Context, Result};

/// A type-erased middleware that can be stored in a vector.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// A step in the request chain.
///
/// # Invariants
///
/// - `next.run()` is called at most once; [`Next`] is consumed by the call
/// - errors from `next` are returned unchanged unless the middleware
///   deliberately transforms them
/// - per-request state belongs in the [`Context`], not in `self`
pub trait Middleware: Send + Sync + 'static {
    /// Name used in logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Processes the request, optionally delegating to `next`.
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<()>>;
}

/// The terminal step of a chain.
///
/// Implemented for every `for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<()>>`;
/// wrap closures in [`handler_fn`] so the compiler can infer that signature.
pub trait Handler: Send + Sync + 'static {
    /// Produces the response for the request.
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<()>>;
}

impl<F> Handler for F
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<()>> {
        self(ctx)
    }
}

/// Turns a closure into a [`Handler`].
///
/// ```
/// use conduit_middleware::handler_fn;
/// use http::StatusCode;
///
/// let hello = handler_fn(|ctx| {
///     Box::pin(async move {
///         ctx.text(StatusCode::OK, "hello");
///         Ok(())
///     })
/// });
/// # let _ = hello;
/// ```
pub fn handler_fn<F>(f: F) -> F
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    f
}

/// The rest of the chain, as seen from one middleware.
///
/// Consumed by [`run`](Self::run), so it can be invoked at most once.
pub struct Next<'a> {
    layers: &'a [BoxedMiddleware],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    /// Creates a continuation over `layers` ending in `handler`.
    pub fn new(layers: &'a [BoxedMiddleware], handler: &'a dyn Handler) -> Self {
        Self { layers, handler }
    }

    /// Runs the next middleware, or the handler once no middleware is left.
    pub fn run<'c>(self, ctx: &'c mut Context) -> BoxFuture<'c, Result<()>>
    where
        'a: 'c,
    {
        match self.layers.split_first() {
            Some((first, rest)) => first.handle(
                ctx,
                Next {
                    layers: rest,
                    handler: self.handler,
                },
            ),
            None => self.handler.call(ctx),
        }
    }

    /// Number of middleware still ahead of the handler.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.layers.len()
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field(
                "layers",
                &self.layers.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

/// A middleware built from a closure.
///
/// # Example
///
/// ```
/// use conduit_middleware::FnMiddleware;
///
/// let timing = FnMiddleware::new("timing", |ctx, next| {
///     Box::pin(async move {
///         let result = next.run(ctx).await;
///         tracing::debug!(elapsed = ?ctx.elapsed(), "request finished");
///         result
///     })
/// });
/// # let _ = timing;
/// ```
pub struct FnMiddleware<F> {
    name: &'static str,
    func: F,
}

impl<F> FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<()>>
        + Send
        + Sync
        + 'static,
{
    /// Creates a new function-based middleware.
    pub const fn new(name: &'static str, func: F) -> Self {
        Self { name, func }
    }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<()>>
        + Send
        + Sync
        + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        (self.func)(ctx, next)
    }
}

impl<F> fmt::Debug for FnMiddleware<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMiddleware")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
