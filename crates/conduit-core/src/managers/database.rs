//! Database capability.
//!
//! Conduit does not ship a driver. Applications adapt their pool of choice to
//! this trait and register it on [`Managers`](super::Managers).

use serde_json::{Map, Value};

use crate::error::Result;
use crate::BoxFuture;

/// One result row, column name to value.
pub type Row = Map<String, Value>;

/// Query and statement execution.
///
/// Implementations own their connection pool and must be safe to call from
/// many requests at once. Long-running calls should be wrapped with
/// [`Context::until_cancelled`](crate::Context::until_cancelled) by the caller
/// so that a cancelled request stops waiting on them.
pub trait Database: Send + Sync {
    /// Runs a query and returns its rows.
    fn query<'a>(&'a self, statement: &'a str, params: &'a [Value])
        -> BoxFuture<'a, Result<Vec<Row>>>;

    /// Runs a statement and returns the number of affected rows.
    fn exec<'a>(&'a self, statement: &'a str, params: &'a [Value]) -> BoxFuture<'a, Result<u64>>;
}
