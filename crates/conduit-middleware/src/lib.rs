//! # Conduit Middleware
//!
//! The middleware chain executor for Conduit.
//!
//! Middleware from every scope a route belongs to is flattened into one
//! [`Chain`] and executed onion-style around the route's [`Handler`]:
//!
//! ```text
//! Request → Global → Group → Route → Handler
//!                                      ↓
//! Response ← Global ← Group ← Route ←──┘
//! ```
//!
//! The chain itself never inspects errors. Every invocation runs inside the
//! recovery boundary ([`run_recovered`]), which catches panics, enforces the
//! request deadline and hands any error to the one registered
//! [`ErrorHandler`].
//!
//! ## Key Features
//!
//! - **Onion order**: pre-logic runs outer to inner, post-logic inner to outer
//! - **Short-circuit**: a middleware that never calls `next` ends the chain
//! - **Post-logic always runs**: `next` returns errors instead of unwinding
//! - **Built-ins**: request ID header, access log, timeout, sessions, auth
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use conduit_core::{managers::Managers, ContextFactory};
//! use conduit_middleware::{handler_fn, run_recovered, Chain, DefaultErrorHandler};
//! use conduit_middleware::stages::RequestIdHeader;
//! use http::StatusCode;
//!
//! # tokio_test::block_on(async {
//! let chain = Chain::new(
//!     &[Arc::new(RequestIdHeader::new())],
//!     &[],
//!     Arc::new(handler_fn(|ctx| Box::pin(async move {
//!         ctx.text(StatusCode::OK, "ok");
//!         Ok(())
//!     }))),
//! );
//!
//! let factory = ContextFactory::new(Arc::new(Managers::default()));
//! let mut ctx = factory.build(http::Request::get("/").body(Bytes::new()).unwrap(), None);
//! run_recovered(&chain, &mut ctx, &DefaultErrorHandler).await;
//!
//! assert_eq!(ctx.response().status(), StatusCode::OK);
//! assert!(ctx.response().headers().contains_key("x-request-id"));
//! # });
//! ```

#![forbid(unsafe_code)]

pub mod chain;
pub mod middleware;
pub mod recover;
pub mod stages;

pub use chain::Chain;
pub use conduit_core::BoxFuture;
pub use middleware::{handler_fn, BoxedMiddleware, FnMiddleware, Handler, Middleware, Next};
pub use recover::{
    allow_header, error_handler_fn, recover, resolve_error, run_recovered, DefaultErrorHandler,
    ErrorHandler, Guard, Outcome,
};
