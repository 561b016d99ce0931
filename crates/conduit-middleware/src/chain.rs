//! Composition of scoped middleware around a handler.
//!
//! Middleware from every scope is flattened into one ordered list:
//!
//! ```text
//! global (registration order) → outer group → inner group → route → handler
//! ```
//!
//! and then executed onion-style, so post-logic unwinds in the reverse order.

use std::fmt;
use std::sync::Arc;

use conduit_core::{BoxFuture, Context, Result};

use crate::middleware::{BoxedMiddleware, Handler, Next};

/// A composed middleware chain ending in a handler.
///
/// Cloning is cheap; the layers and handler are shared.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use conduit_middleware::{handler_fn, BoxedMiddleware, Chain, FnMiddleware};
/// use http::StatusCode;
///
/// let log: BoxedMiddleware = Arc::new(FnMiddleware::new("log", |ctx, next| {
///     Box::pin(async move { next.run(ctx).await })
/// }));
/// let ok = handler_fn(|ctx| Box::pin(async move {
///     ctx.text(StatusCode::OK, "ok");
///     Ok(())
/// }));
///
/// let chain = Chain::new(&[log], &[], Arc::new(ok));
/// assert_eq!(chain.names(), vec!["log"]);
/// ```
#[derive(Clone)]
pub struct Chain {
    layers: Arc<[BoxedMiddleware]>,
    handler: Arc<dyn Handler>,
}

impl Chain {
    /// Flattens `global` then `scoped` middleware around `handler`.
    #[must_use]
    pub fn new(
        global: &[BoxedMiddleware],
        scoped: &[BoxedMiddleware],
        handler: Arc<dyn Handler>,
    ) -> Self {
        let layers: Vec<BoxedMiddleware> = global.iter().chain(scoped).cloned().collect();
        Self {
            layers: layers.into(),
            handler,
        }
    }

    /// A chain with no middleware.
    #[must_use]
    pub fn handler_only(handler: Arc<dyn Handler>) -> Self {
        Self::new(&[], &[], handler)
    }

    /// Executes the chain against `ctx`.
    pub fn run<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<()>> {
        Next::new(&self.layers, self.handler.as_ref()).run(ctx)
    }

    /// Middleware names, outermost first.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|m| m.name()).collect()
    }

    /// Number of middleware layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// True when the chain is just the handler.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("layers", &self.names())
            .finish_non_exhaustive()
    }
}
