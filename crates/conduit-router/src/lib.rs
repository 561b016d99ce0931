//! Route matching for Conduit.
//!
//! This crate maps `(method, host, path)` to one registered route plus the
//! parameters captured from the path. It knows nothing about handlers or
//! middleware: a [`RouteTable`] is generic over whatever endpoint the caller
//! binds to each route.
//!
//! # Features
//!
//! - **Pattern syntax**: literals, `:name`, `:name(regex)` and a trailing `*name`
//! - **Registration order**: the first registered route that accepts the
//!   request wins, so outcomes never depend on pattern specificity
//! - **Host partitions**: routes can be bound to one host; other hosts use the
//!   default partition
//! - **Distinct failures**: [`Lookup::NotFound`] and
//!   [`Lookup::MethodNotAllowed`] are separate signals, not errors
//! - **Reverse routing**: named routes render back to paths with
//!   [`RouteTable::url_for`]
//!
//! # Example
//!
//! ```rust
//! use conduit_router::{Lookup, Route, RouteTable};
//! use http::Method;
//!
//! let mut table = RouteTable::new();
//! table.insert(Route::new(Method::GET, "/users", "list").unwrap()).unwrap();
//! table.insert(Route::new(Method::GET, "/users/:id([0-9]+)", "show").unwrap()).unwrap();
//! table.insert(Route::new(Method::GET, "/assets/*path", "asset").unwrap()).unwrap();
//!
//! let Lookup::Found(m) = table.lookup(&Method::GET, None, "/users/42") else {
//!     unreachable!()
//! };
//! assert_eq!(*m.route.endpoint(), "show");
//! assert_eq!(m.params.get("id"), Some("42"));
//!
//! assert!(matches!(
//!     table.lookup(&Method::POST, None, "/users"),
//!     Lookup::MethodNotAllowed { .. }
//! ));
//! assert!(matches!(table.lookup(&Method::GET, None, "/users/abc"), Lookup::NotFound));
//! ```

mod error;
mod params;
mod pattern;
mod route;
mod table;

pub use error::{PatternError, RouteError};
pub use params::Params;
pub use pattern::{join_paths, Pattern, Segment};
pub use route::{normalize_host, MethodFilter, Route, RouteId};
pub use table::{Lookup, RouteMatch, RouteTable};
