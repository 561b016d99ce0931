//! Cache capability and the in-memory variant.

use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::error::Result;
use crate::BoxFuture;

/// Key/value cache shared by all requests.
pub trait Cache: Send + Sync {
    /// Returns the live value for `key`.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Bytes>>>;

    /// Stores `value`. `ttl` of `None` uses the backend default.
    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, Result<()>>;

    /// Removes `key`, returning whether a live entry existed.
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// A [`Cache`] held in process memory.
///
/// Expired entries are dropped lazily on access and whenever the cache grows
/// past `max_entries`. When it is still full after that, the entry closest to
/// expiry is evicted.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use conduit_core::managers::{Cache, MemoryCache};
///
/// # tokio_test::block_on(async {
/// let cache = MemoryCache::new();
/// cache.set("greeting", Bytes::from_static(b"hello"), None).await.unwrap();
/// assert_eq!(cache.get("greeting").await.unwrap(), Some(Bytes::from_static(b"hello")));
/// assert!(cache.delete("greeting").await.unwrap());
/// # });
/// ```
#[derive(Debug)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    default_ttl: Option<Duration>,
    max_entries: usize,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    /// Default capacity.
    pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

    /// Creates a cache with no default TTL.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl: None,
            max_entries: Self::DEFAULT_MAX_ENTRIES,
        }
    }

    /// Sets the TTL applied when `set` is called without one.
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Sets the capacity.
    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    /// Number of stored entries, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get_now(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        let live = self
            .entries
            .get(key)
            .map(|e| e.is_live(now).then(|| e.value.clone()));
        match live {
            Some(Some(value)) => Some(value),
            Some(None) => {
                self.entries.remove_if(key, |_, e| !e.is_live(now));
                None
            }
            None => None,
        }
    }

    fn set_now(&self, key: &str, value: Bytes, ttl: Option<Duration>) {
        let now = Instant::now();
        let expires_at = ttl.or(self.default_ttl).map(|ttl| now + ttl);

        if !self.entries.contains_key(key) && self.entries.len() >= self.max_entries {
            self.entries.retain(|_, e| e.is_live(now));
            if self.entries.len() >= self.max_entries {
                self.evict_one();
            }
        }
        self.entries
            .insert(key.to_string(), Entry { value, expires_at });
    }

    fn evict_one(&self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|e| e.expires_at.map_or((1, None), |at| (0, Some(at))))
            .map(|e| e.key().clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }

    fn delete_now(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .remove(key)
            .is_some_and(|(_, e)| e.is_live(now))
    }
}

impl Cache for MemoryCache {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Bytes>>> {
        Box::pin(async move { Ok(self.get_now(key)) })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.set_now(key, value, ttl);
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Ok(self.delete_now(key)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = MemoryCache::new();
        cache
            .set("k", Bytes::from_static(b"v"), Some(Duration::from_secs(5)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(cache.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("k").await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_ttl_applies() {
        let cache = MemoryCache::new().with_default_ttl(Duration::from_secs(1));
        cache.set("k", Bytes::from_static(b"v"), None).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!cache.delete("k").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_soonest_expiry() {
        let cache = MemoryCache::new().with_max_entries(2);
        cache
            .set("short", Bytes::new(), Some(Duration::from_secs(10)))
            .await
            .unwrap();
        cache.set("forever", Bytes::new(), None).await.unwrap();
        cache.set("new", Bytes::new(), None).await.unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.get("short").await.unwrap().is_none());
        assert!(cache.get("forever").await.unwrap().is_some());
        assert!(cache.get("new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let cache = MemoryCache::new().with_max_entries(1);
        cache.set("a", Bytes::from_static(b"1"), None).await.unwrap();
        cache.set("a", Bytes::from_static(b"2"), None).await.unwrap();
        assert_eq!(
            cache.get("a").await.unwrap(),
            Some(Bytes::from_static(b"2"))
        );
    }
}
