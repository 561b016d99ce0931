//! The route table.
//!
//! Routes are kept in registration order and partitioned by host. Lookup scans
//! one partition front to back and returns the first route whose pattern and
//! method both accept the request. There is no specificity ranking: if
//! `/users/:id` is registered before `/users/me`, a request for `/users/me`
//! binds `id = "me"`.

use std::collections::HashMap;

use http::Method;
use indexmap::IndexMap;

use crate::error::RouteError;
use crate::params::Params;
use crate::pattern::split_path;
use crate::route::{normalize_host, MethodFilter, Route, RouteId};

/// A matched route and its captures.
#[derive(Debug)]
pub struct RouteMatch<'a, T> {
    /// Registration id of the matched route.
    pub id: RouteId,
    /// The matched route.
    pub route: &'a Route<T>,
    /// Decoded path parameters.
    pub params: Params,
}

/// Result of a [`RouteTable::lookup`].
#[derive(Debug)]
pub enum Lookup<'a, T> {
    /// A route accepted both the path and the method.
    Found(RouteMatch<'a, T>),
    /// At least one route accepted the path, none accepted the method.
    MethodNotAllowed {
        /// Methods that would have matched, in registration order.
        allowed: Vec<Method>,
    },
    /// No route accepted the path.
    NotFound,
}

impl<T> Lookup<'_, T> {
    /// Returns true for [`Lookup::Found`].
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// Host-partitioned, registration-ordered routes.
///
/// Routes registered with a host only ever match requests for that host. A
/// host that has at least one route is *claimed*: its requests are resolved
/// against its own partition only. Every other host uses the default
/// partition.
///
/// # Example
///
/// ```rust
/// use conduit_router::{Lookup, Route, RouteTable};
/// use http::Method;
///
/// let mut table = RouteTable::new();
/// table.insert(Route::new(Method::GET, "/items/:id", "show").unwrap()).unwrap();
/// table.insert(Route::new(Method::GET, "/", "admin_home").unwrap().with_host("admin.local")).unwrap();
///
/// match table.lookup(&Method::GET, Some("www.local"), "/items/42") {
///     Lookup::Found(m) => {
///         assert_eq!(*m.route.endpoint(), "show");
///         assert_eq!(m.params.get("id"), Some("42"));
///     }
///     _ => panic!("expected a match"),
/// }
///
/// // admin.local is claimed, so default routes do not apply to it
/// assert!(matches!(
///     table.lookup(&Method::GET, Some("admin.local"), "/items/42"),
///     Lookup::NotFound
/// ));
/// ```
#[derive(Debug, Clone)]
pub struct RouteTable<T> {
    routes: Vec<Route<T>>,
    default: Vec<usize>,
    hosts: IndexMap<String, Vec<usize>>,
    names: HashMap<String, usize>,
}

impl<T> Default for RouteTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RouteTable<T> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            default: Vec::new(),
            hosts: IndexMap::new(),
            names: HashMap::new(),
        }
    }

    /// Appends a route.
    ///
    /// Fails only when the route's name is already taken.
    pub fn insert(&mut self, route: Route<T>) -> Result<RouteId, RouteError> {
        let index = self.routes.len();

        if let Some(name) = route.name() {
            if self.names.contains_key(name) {
                return Err(RouteError::DuplicateName(name.to_string()));
            }
            self.names.insert(name.to_string(), index);
        }

        match route.host() {
            Some(host) => self.hosts.entry(host.to_string()).or_default().push(index),
            None => self.default.push(index),
        }
        self.routes.push(route);
        Ok(RouteId(index))
    }

    /// Resolves a request to a route.
    ///
    /// `host` is the raw `Host` header (or URI authority), if any.
    pub fn lookup(&self, method: &Method, host: Option<&str>, path: &str) -> Lookup<'_, T> {
        let partition = host
            .map(normalize_host)
            .and_then(|h| self.hosts.get(&h))
            .unwrap_or(&self.default);

        let segments: Vec<&str> = split_path(path).collect();
        let mut params = Params::new();
        let mut allowed: Vec<Method> = Vec::new();

        for &index in partition {
            let route = &self.routes[index];
            if !route.pattern().match_segments(&segments, &mut params) {
                continue;
            }
            if route.method().accepts(method) {
                return Lookup::Found(RouteMatch {
                    id: RouteId(index),
                    route,
                    params,
                });
            }
            if let MethodFilter::Only(m) = route.method() {
                if !allowed.contains(m) {
                    allowed.push(m.clone());
                }
            }
            params.truncate(0);
        }

        if allowed.is_empty() {
            Lookup::NotFound
        } else {
            Lookup::MethodNotAllowed { allowed }
        }
    }

    /// Builds the path of a named route.
    ///
    /// ```rust
    /// use conduit_router::{Route, RouteTable};
    /// use http::Method;
    ///
    /// let mut table = RouteTable::new();
    /// table
    ///     .insert(Route::new(Method::GET, "/users/:id", ()).unwrap().with_name("user"))
    ///     .unwrap();
    ///
    /// assert_eq!(table.url_for("user", &[("id", "a b")]).unwrap(), "/users/a%20b");
    /// ```
    pub fn url_for(&self, name: &str, values: &[(&str, &str)]) -> Result<String, RouteError> {
        let index = self
            .names
            .get(name)
            .ok_or_else(|| RouteError::UnknownRoute(name.to_string()))?;
        self.routes[*index].pattern().render(name, values)
    }

    /// Returns the route registered under `id`.
    pub fn get(&self, id: RouteId) -> Option<&Route<T>> {
        self.routes.get(id.0)
    }

    /// Iterates over all routes in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (RouteId, &Route<T>)> {
        self.routes.iter().enumerate().map(|(i, r)| (RouteId(i), r))
    }

    /// Hosts that have their own partition, in first-registration order.
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.hosts.keys().map(String::as_str)
    }

    /// Number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns true if no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
