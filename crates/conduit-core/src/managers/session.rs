//! Session capability and a cache-backed store.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::cache::Cache;
use crate::error::{Error, Result};
use crate::BoxFuture;

/// Server-side session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    id: String,
    data: Map<String, Value>,
    #[serde(skip)]
    dirty: bool,
}

impl Session {
    /// Starts a new, empty session with a random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            data: Map::new(),
            dirty: true,
        }
    }

    /// Session identifier, as sent in the session cookie.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the raw value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Deserializes the value stored under `key`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.data
            .get(key)
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| Error::bad_request(format!("session value `{key}`: {e}")))
    }

    /// Stores `value` under `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
        self.dirty = true;
    }

    /// Removes `key`.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.data.remove(key);
        self.dirty |= removed.is_some();
        removed
    }

    /// True when the session changed since it was loaded.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Marks the session as persisted.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Loads and persists sessions.
pub trait SessionStore: Send + Sync {
    /// Loads the session with `id`, if it exists.
    fn load<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Session>>>;

    /// Persists `session`.
    fn save<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<()>>;

    /// Deletes the session with `id`.
    fn destroy<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// A [`SessionStore`] that keeps JSON-encoded sessions in any [`Cache`].
///
/// Pair it with [`MemoryCache`](super::MemoryCache) for a single process or
/// [`FileCache`](super::FileCache) to survive restarts.
pub struct CacheSessionStore {
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl CacheSessionStore {
    /// Default idle lifetime of a session.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

    /// Creates a store over `cache`.
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self {
            cache,
            ttl: Self::DEFAULT_TTL,
        }
    }

    /// Sets how long an untouched session lives.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn key(id: &str) -> String {
        format!("session:{id}")
    }
}

impl std::fmt::Debug for CacheSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSessionStore")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl SessionStore for CacheSessionStore {
    fn load<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Session>>> {
        Box::pin(async move {
            let Some(raw) = self.cache.get(&Self::key(id)).await? else {
                return Ok(None);
            };
            match serde_json::from_slice::<Session>(&raw) {
                Ok(session) if session.id == id => Ok(Some(session)),
                Ok(_) => Ok(None),
                Err(e) => {
                    tracing::warn!(error = %e, "discarding undecodable session");
                    self.cache.delete(&Self::key(id)).await?;
                    Ok(None)
                }
            }
        })
    }

    fn save<'a>(&'a self, session: &'a Session) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let raw = serde_json::to_vec(session)
                .map_err(|e| Error::resource_with_source("session", "encode session", e))?;
            self.cache
                .set(&Self::key(&session.id), Bytes::from(raw), Some(self.ttl))
                .await
        })
    }

    fn destroy<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.cache.delete(&Self::key(id)).await?;
            Ok(())
        })
    }
}
