//! # Conduit Test
//!
//! In-memory request testing for Conduit applications. A [`TestClient`]
//! feeds requests to [`Framework::handle`](conduit_server::Framework::handle)
//! so tests see the full pipeline without a socket.
//!
//! ```rust,ignore
//! let client = TestClient::new(app).with_default_header("accept-language", "de");
//!
//! let response = client
//!     .post("/users")
//!     .json(&json!({ "name": "Alice" }))
//!     .send()
//!     .await;
//!
//! response.assert_status(StatusCode::CREATED);
//! let user: User = response.json()?;
//! ```

#![forbid(unsafe_code)]

mod client;
mod error;
mod request;
mod response;

pub use client::{TestClient, TestClientRequest};
pub use error::TestError;
pub use request::{TestRequest, TestRequestBuilder};
pub use response::TestResponse;
