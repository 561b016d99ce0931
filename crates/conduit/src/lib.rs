//! # Conduit
//!
//! A middleware pipeline web framework with request-scoped service
//! injection.
//!
//! Every request gets a [`Context`](conduit_core::Context) carrying the
//! request, a response under construction and handles to the application's
//! managers (cache, sessions, security, translator, files, metrics). The
//! context flows through global middleware, route middleware and finally
//! the handler; errors and panics anywhere in that chain are turned into a
//! single response by the error handler.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use conduit::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new().with_optional_file("conduit.toml")?.load()?;
//!     let (mut app, _telemetry) = conduit::bootstrap(&config).await?;
//!
//!     app.get("/users/:id", handler_fn(|ctx| Box::pin(async move {
//!         let id = ctx.param("id").unwrap_or_default().to_string();
//!         ctx.json(StatusCode::OK, &serde_json::json!({ "id": id }))
//!     })));
//!
//!     app.listen().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Pipeline
//!
//! ```text
//! Request → route lookup → global middleware → route middleware → handler
//!                                                                    ↓
//! Response ← error handler (on Err or panic) ←───────────────────────┘
//! ```

#![forbid(unsafe_code)]

pub mod bootstrap;

pub use bootstrap::{assemble, assemble_with, bootstrap, BootstrapError};

pub use conduit_config as config;
pub use conduit_core as core;
pub use conduit_middleware as middleware;
pub use conduit_router as router;
pub use conduit_server as server;
pub use conduit_telemetry as telemetry;

/// Common imports.
///
/// ```rust,ignore
/// use conduit::prelude::*;
/// ```
pub mod prelude {
    pub use conduit_config::{ConduitConfig, ConfigLoader};
    pub use conduit_core::managers::{Cache, Principal, Session};
    pub use conduit_core::{BoxFuture, Context, Error, ErrorKind, Result};
    pub use conduit_middleware::stages::{
        end_session, AccessLog, Authenticate, Authorize, RequestIdHeader, Sessions, Timeout,
    };
    pub use conduit_middleware::{
        error_handler_fn, handler_fn, ErrorHandler, FnMiddleware, Handler, Middleware, Next,
    };
    pub use conduit_server::{Framework, Plugin, PluginHost, ServerConfig, ShutdownSignal};
    pub use http::{Method, StatusCode};
}
