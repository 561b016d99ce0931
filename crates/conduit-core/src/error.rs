//! Error types for Conduit.
//!
//! Every failure a request can run into is an [`Error`]. Errors are grouped
//! into an [`ErrorKind`] that decides where they are resolved:
//!
//! | Kind | Resolved by |
//! |---|---|
//! | `Routing` | the framework, before any middleware runs |
//! | `Middleware` | the error handler |
//! | `RecoveredFault` | the error handler, after the panic is caught |
//! | `Timeout` | the error handler, after the chain is interrupted |
//! | `Resource` | the calling middleware or handler; the error handler if it escapes |
//!
//! Only [`Error::public_message`] ever reaches a response body. The `Display`
//! output and any `source` chain are for logs.

use std::time::Duration;

use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::plugin::Permission;

/// Result type alias using [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Where an error is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No route, or no route for the method.
    Routing,
    /// Returned explicitly by middleware or a handler.
    Middleware,
    /// A panic caught by the recovery boundary.
    RecoveredFault,
    /// The deadline elapsed or the request was cancelled.
    Timeout,
    /// A manager call failed.
    Resource,
}

/// Standard error type for Conduit.
///
/// # Example
///
/// ```
/// use conduit_core::{Error, ErrorKind};
/// use http::StatusCode;
///
/// fn parse_limit(raw: &str) -> Result<u32, Error> {
///     raw.parse().map_err(|_| Error::bad_request("limit must be a number"))
/// }
///
/// let err = parse_limit("ten").unwrap_err();
/// assert_eq!(err.kind(), ErrorKind::Middleware);
/// assert_eq!(err.status(), StatusCode::BAD_REQUEST);
/// ```
#[derive(Debug, Error)]
pub enum Error {
    /// No route matched the path.
    #[error("no route for {path}")]
    NotFound {
        /// Request path.
        path: String,
    },

    /// A route matched the path but not the method.
    #[error("method {method} not allowed")]
    MethodNotAllowed {
        /// Request method.
        method: Method,
        /// Methods that would have matched.
        allowed: Vec<Method>,
    },

    /// An error with an explicit status, safe to show to the client.
    #[error("{status}: {message}")]
    Http {
        /// Response status.
        status: StatusCode,
        /// Client-facing message.
        message: String,
    },

    /// The request could not be understood.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// No valid credentials were presented.
    #[error("authentication required")]
    Unauthorized,

    /// The caller may not perform `action`.
    #[error("forbidden: {action}")]
    Forbidden {
        /// The denied action.
        action: String,
    },

    /// A panic caught by the recovery boundary.
    #[error("handler panicked: {message}")]
    Fault {
        /// Panic payload, if it was a string.
        message: String,
    },

    /// The request deadline elapsed.
    #[error("request timed out after {elapsed:?}")]
    Timeout {
        /// Time spent before the deadline fired.
        elapsed: Duration,
    },

    /// The request was cancelled before it completed.
    #[error("request cancelled")]
    Cancelled,

    /// A manager call failed.
    #[error("{manager} failed: {message}")]
    Resource {
        /// Manager name, e.g. `"cache"`.
        manager: &'static str,
        /// What went wrong.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<anyhow::Error>,
    },

    /// A plugin asked for a manager it was not granted.
    #[error("permission `{0}` was not granted")]
    PermissionDenied(Permission),

    /// Anything else.
    #[error("internal error: {message}")]
    Internal {
        /// What went wrong.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<anyhow::Error>,
    },
}

impl Error {
    /// Creates an error with an explicit status and client-facing message.
    #[must_use]
    pub fn http(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Creates a bad request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Creates a forbidden error for `action`.
    #[must_use]
    pub fn forbidden(action: impl Into<String>) -> Self {
        Self::Forbidden {
            action: action.into(),
        }
    }

    /// Creates a manager failure.
    #[must_use]
    pub fn resource(manager: &'static str, message: impl Into<String>) -> Self {
        Self::Resource {
            manager,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a manager failure with a source error.
    pub fn resource_with_source(
        manager: &'static str,
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Resource {
            manager,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an internal error with a source error.
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } | Self::MethodNotAllowed { .. } => ErrorKind::Routing,
            Self::Http { .. }
            | Self::BadRequest(_)
            | Self::Unauthorized
            | Self::Forbidden { .. }
            | Self::Internal { .. } => ErrorKind::Middleware,
            Self::Fault { .. } => ErrorKind::RecoveredFault,
            Self::Timeout { .. } | Self::Cancelled => ErrorKind::Timeout,
            Self::Resource { .. } | Self::PermissionDenied(_) => ErrorKind::Resource,
        }
    }

    /// Returns the HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::Http { status, .. } => *status,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            Self::Fault { .. }
            | Self::Resource { .. }
            | Self::PermissionDenied(_)
            | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::MethodNotAllowed { .. } => "METHOD_NOT_ALLOWED",
            Self::Http { .. } => "HTTP_ERROR",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::Fault { .. }
            | Self::Resource { .. }
            | Self::PermissionDenied(_)
            | Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Returns true if the status is a 4xx.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }

    /// The message that may be shown to the client.
    ///
    /// Server-side failures collapse to the status reason phrase.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Http { status, message } if status.is_client_error() => message.clone(),
            Self::BadRequest(message) => message.clone(),
            Self::NotFound { .. }
            | Self::MethodNotAllowed { .. }
            | Self::Unauthorized
            | Self::Forbidden { .. } => self.to_string(),
            other => other
                .status()
                .canonical_reason()
                .unwrap_or("Internal Server Error")
                .to_string(),
        }
    }

    /// Builds the response envelope for this error.
    #[must_use]
    pub fn to_envelope(&self, request_id: Option<&str>) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.public_message(),
                request_id: request_id.map(ToString::to_string),
            },
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(source: anyhow::Error) -> Self {
        Self::Internal {
            message: source.to_string(),
            source: Some(source),
        }
    }
}

/// Serializable error body: `{"error": {"code", "message", "request_id"}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// The error details.
    pub error: ErrorDetail,
}

/// Error detail within an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code.
    pub code: String,
    /// Client-facing message.
    pub message: String,
    /// Request ID for correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}
