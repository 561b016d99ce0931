//! Built-in middleware.
//!
//! None of these run unless registered. A typical global stack is:
//!
//! ```text
//! RequestIdHeader → AccessLog → Timeout → Sessions → Authenticate → Authorize → handler
//! ```
//!
//! | Middleware | Purpose |
//! |---|---|
//! | [`RequestIdHeader`] | echo the request ID in `x-request-id` |
//! | [`AccessLog`] | one structured log event and request metrics per request |
//! | [`Timeout`] | per-scope deadline |
//! | [`Sessions`] | load and persist the cookie session |
//! | [`Authenticate`] | resolve the caller through the security manager |
//! | [`Authorize`] | check the caller against an action |

pub mod access_log;
pub mod auth;
pub mod request_id;
pub mod session;
pub mod timeout;

pub use access_log::{AccessLog, REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};
pub use auth::{Authenticate, Authorize};
pub use request_id::{RequestIdHeader, REQUEST_ID_HEADER};
pub use session::{end_session, Sessions, SESSION_COOKIE};
pub use timeout::Timeout;
