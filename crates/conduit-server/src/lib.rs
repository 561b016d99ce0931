//! # Conduit Server
//!
//! The composition root of a Conduit application and its HTTP listener.
//!
//! - [`Framework`]: route registration, groups, host scopes, global
//!   middleware, the error handler and [`Framework::handle`]
//! - [`Lifecycle`]: ordered startup and shutdown hooks
//! - [`Plugin`]: extensions installed with a permission-filtered manager view
//! - Listener: hyper-util auto connections, body limit, graceful shutdown
//!
//! ## Example
//!
//! ```rust,no_run
//! use conduit_middleware::handler_fn;
//! use conduit_middleware::stages::{AccessLog, RequestIdHeader};
//! use conduit_server::{Framework, ServerConfig};
//! use http::StatusCode;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut app = Framework::new(ServerConfig::builder().http_addr("0.0.0.0:8080").build());
//!     app.use_global(RequestIdHeader::new()).use_global(AccessLog::new());
//!     app.get("/health", handler_fn(|ctx| Box::pin(async move {
//!         ctx.text(StatusCode::OK, "ok");
//!         Ok(())
//!     })));
//!
//!     app.listen().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

#[macro_use]
mod macros;

pub mod config;
pub mod framework;
pub mod lifecycle;
pub mod plugin;
pub mod server;
pub mod shutdown;

pub use config::{ServerConfig, ServerConfigBuilder};
pub use framework::{Framework, Group, RouteOptions, IN_FLIGHT_REQUESTS};
pub use lifecycle::{Lifecycle, LifecycleError, LifecycleResult};
pub use plugin::{Plugin, PluginError, PluginHost};
pub use server::{ServerError, FORCE_GRACE};
pub use shutdown::{ConnectionGuard, ConnectionTracker, ShutdownSignal};
