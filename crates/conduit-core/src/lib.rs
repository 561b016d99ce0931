//! Core types for Conduit.
//!
//! This crate holds everything a request carries through the middleware
//! chain and nothing about how the chain itself runs:
//!
//! - [`Context`]: the per-request state, built by a [`ContextFactory`]
//! - [`Error`]: the error taxonomy and the client-facing error envelope
//! - [`CancellationToken`]: a hierarchical cancel signal with a recorded reason
//! - [`ScopedCache`]: a cache partition that lives exactly as long as its request
//! - [`managers`]: capability traits for database, cache, sessions, security,
//!   i18n, files and metrics, with bundled in-process variants
//! - [`plugin`]: permission sets and the restricted manager view given to plugins
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use conduit_core::{managers::{Managers, MemoryCache}, ContextFactory};
//! use http::StatusCode;
//!
//! let managers = Arc::new(Managers::builder().cache(MemoryCache::new()).build());
//! let factory = ContextFactory::new(managers);
//!
//! let request = http::Request::get("/health").body(Bytes::new()).unwrap();
//! let mut ctx = factory.build(request, None);
//! ctx.scoped().set("checked", true);
//! ctx.text(StatusCode::OK, "ok");
//!
//! let response = ctx.take_response();
//! assert_eq!(response.status(), StatusCode::OK);
//! ctx.release();
//! assert_eq!(factory.scoped_store().active(), 0);
//! ```

use std::future::Future;
use std::pin::Pin;

mod cancel;
mod context;
mod error;
mod logger;
pub mod managers;
pub mod plugin;
mod request_id;
mod response;
mod scoped;

pub use cancel::{CancelReason, CancellationToken};
pub use conduit_router::Params;
pub use context::{Context, ContextFactory, FileHandle};
pub use error::{Error, ErrorDetail, ErrorEnvelope, ErrorKind, Result};
pub use logger::RequestLogger;
pub use request_id::RequestId;
pub use response::{Response, ResponseState};
pub use scoped::{ScopedCache, ScopedCacheStore};

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
