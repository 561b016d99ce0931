//! Request-scoped cache partitions.
//!
//! Each in-flight request gets its own partition keyed by its [`RequestId`].
//! Partitions are created on first use and discarded when the owning context
//! is released, so entries never outlive the request that wrote them.

use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::request_id::RequestId;

/// One request's cache partition.
///
/// Cloning the handle shares the same partition.
#[derive(Debug, Clone, Default)]
pub struct ScopedCache {
    entries: Arc<DashMap<String, Value>>,
}

impl ScopedCache {
    /// Returns a copy of the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    /// Stores `value` under `key`, returning the previous value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(key.into(), value.into())
    }

    /// Deserializes the value stored under `key`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get(key)
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| Error::internal_with_source(format!("scoped cache entry `{key}`"), e))
    }

    /// Serializes and stores `value` under `key`.
    pub fn set_as<T: Serialize>(&self, key: impl Into<String>, value: &T) -> Result<()> {
        let key = key.into();
        let value = serde_json::to_value(value)
            .map_err(|e| Error::internal_with_source(format!("scoped cache entry `{key}`"), e))?;
        self.entries.insert(key, value);
        Ok(())
    }

    /// Removes `key`.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.remove(key).map(|(_, v)| v)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the partition is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn clear(&self) {
        self.entries.clear();
    }
}

/// Process-wide registry of request partitions.
///
/// # Example
///
/// ```
/// use conduit_core::{RequestId, ScopedCacheStore};
///
/// let store = ScopedCacheStore::new();
/// let id = RequestId::new();
///
/// store.get_or_create(id).set("user", "alice");
/// assert_eq!(store.get_or_create(id).get("user").unwrap(), "alice");
///
/// assert!(store.discard(id));
/// assert!(store.get_or_create(id).is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScopedCacheStore {
    partitions: Arc<DashMap<RequestId, ScopedCache>>,
}

impl ScopedCacheStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the partition for `id`, creating it if needed.
    #[must_use]
    pub fn get_or_create(&self, id: RequestId) -> ScopedCache {
        self.partitions.entry(id).or_default().value().clone()
    }

    /// Drops the partition for `id` and clears every handle to it.
    ///
    /// Returns false if no partition existed.
    pub fn discard(&self, id: RequestId) -> bool {
        match self.partitions.remove(&id) {
            Some((_, cache)) => {
                cache.clear();
                true
            }
            None => false,
        }
    }

    /// Number of live partitions.
    #[must_use]
    pub fn active(&self) -> usize {
        self.partitions.len()
    }
}
