//! Route definitions.

use std::fmt;

use http::Method;

use crate::error::PatternError;
use crate::pattern::Pattern;

/// Which request methods a route accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodFilter {
    /// Every method.
    Any,
    /// Exactly one method.
    Only(Method),
}

impl MethodFilter {
    /// Returns true if `method` is accepted.
    #[must_use]
    pub fn accepts(&self, method: &Method) -> bool {
        match self {
            Self::Any => true,
            Self::Only(m) => m == method,
        }
    }
}

impl From<Method> for MethodFilter {
    fn from(method: Method) -> Self {
        Self::Only(method)
    }
}

impl fmt::Display for MethodFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Only(m) => f.write_str(m.as_str()),
        }
    }
}

/// Position of a route in its table, in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteId(pub(crate) usize);

impl RouteId {
    /// Zero-based registration index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// A (method, host, pattern) binding to an endpoint.
///
/// Routes are immutable once inserted into a [`RouteTable`](crate::RouteTable).
///
/// # Example
///
/// ```rust
/// use conduit_router::{MethodFilter, Route};
/// use http::Method;
///
/// let route = Route::new(Method::GET, "/users/:id", "show_user")
///     .unwrap()
///     .with_host("API.example.com:443")
///     .with_name("users.show");
///
/// assert_eq!(route.host(), Some("api.example.com"));
/// assert_eq!(route.method(), &MethodFilter::Only(Method::GET));
/// ```
#[derive(Debug, Clone)]
pub struct Route<T> {
    method: MethodFilter,
    pattern: Pattern,
    host: Option<String>,
    name: Option<String>,
    endpoint: T,
}

impl<T> Route<T> {
    /// Compiles `pattern` into a route for `method`.
    pub fn new(
        method: impl Into<MethodFilter>,
        pattern: &str,
        endpoint: T,
    ) -> Result<Self, PatternError> {
        Ok(Self {
            method: method.into(),
            pattern: Pattern::parse(pattern)?,
            host: None,
            name: None,
            endpoint,
        })
    }

    /// Restricts the route to one host. The host is normalized with [`normalize_host`].
    #[must_use]
    pub fn with_host(mut self, host: impl AsRef<str>) -> Self {
        self.host = Some(normalize_host(host.as_ref()));
        self
    }

    /// Names the route for reverse lookup.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Accepted methods.
    pub fn method(&self) -> &MethodFilter {
        &self.method
    }

    /// Compiled pattern.
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Host restriction, if any.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Route name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The bound endpoint.
    pub fn endpoint(&self) -> &T {
        &self.endpoint
    }
}

/// Normalizes a `Host` header value for comparison.
///
/// Lower-cases the name, strips any port and a trailing root dot.
///
/// ```rust
/// use conduit_router::normalize_host;
///
/// assert_eq!(normalize_host("Example.COM:8080"), "example.com");
/// assert_eq!(normalize_host("example.com."), "example.com");
/// assert_eq!(normalize_host("[::1]:3000"), "[::1]");
/// ```
#[must_use]
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let name = if host.starts_with('[') {
        match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        }
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
            _ => host,
        }
    };
    name.trim_end_matches('.').to_ascii_lowercase()
}
