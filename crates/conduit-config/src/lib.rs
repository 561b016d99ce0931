//! Typed, layered configuration for Conduit applications.
//!
//! - TOML and JSON configuration files, merged key by key
//! - `.env` files and `CONDUIT__SECTION__KEY` environment overrides
//! - strict schemas: unknown fields and keys are errors
//! - `development()` and `production()` presets
//!
//! # Configuration file format
//!
//! ```toml
//! [server]
//! http_addr = "0.0.0.0:8080"
//! request_timeout_ms = 30000
//! shutdown_timeout_secs = 30
//! max_body_bytes = 2097152
//!
//! [telemetry]
//! service_name = "orders"
//! environment = "production"
//!
//! [telemetry.logging]
//! level = "info"
//! format = "json"
//!
//! [telemetry.metrics]
//! enabled = true
//! endpoint = "/metrics"
//!
//! [cache]
//! backend = "file"
//! dir = "/var/cache/orders"
//!
//! [session]
//! enabled = true
//! cookie_name = "orders_session"
//! ```

#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::ConduitConfig;
pub use error::ConfigError;
pub use loader::{ConfigLoader, DEFAULT_ENV_PREFIX};
pub use schema::{CacheBackend, CacheSection, ServerSection, SessionSection};
