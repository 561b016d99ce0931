//! Filesystem-backed cache.
//!
//! Each key is stored in its own file named by the SHA-1 of the key. A file
//! holds an 8-byte big-endian expiry (Unix milliseconds, `0` for none)
//! followed by the value. Writes go to a unique temporary file first and are
//! renamed into place, so readers never observe a torn value.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use sha1::{Digest, Sha1};
use uuid::Uuid;

use super::cache::Cache;
use crate::error::{Error, Result};
use crate::BoxFuture;

const HEADER_LEN: usize = 8;

/// A [`Cache`] that persists entries under a directory.
#[derive(Debug, Clone)]
pub struct FileCache {
    root: PathBuf,
    default_ttl: Option<Duration>,
}

impl FileCache {
    /// Creates the cache, creating `root` if it does not exist.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| io_error("create cache directory", &root, e))?;
        Ok(Self {
            root,
            default_ttl: None,
        })
    }

    /// Sets the TTL applied when `set` is called without one.
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Directory holding the entries.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha1::digest(key.as_bytes());
        let name: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        self.root.join(name)
    }

    async fn read(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.path_for(key);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("read cache entry", &path, e)),
        };
        if raw.len() < HEADER_LEN {
            remove_quietly(&path).await;
            return Ok(None);
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&raw[..HEADER_LEN]);
        let expires_at = u64::from_be_bytes(header);
        if expires_at != 0 && expires_at <= now_millis() {
            remove_quietly(&path).await;
            return Ok(None);
        }
        Ok(Some(Bytes::copy_from_slice(&raw[HEADER_LEN..])))
    }

    async fn write(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl
            .or(self.default_ttl)
            .map_or(0, |ttl| now_millis().saturating_add(duration_millis(ttl)));

        let mut buf = BytesMut::with_capacity(HEADER_LEN + value.len());
        buf.extend_from_slice(&expires_at.to_be_bytes());
        buf.extend_from_slice(&value);

        let path = self.path_for(key);
        let tmp = path.with_extension(format!("{}.tmp", Uuid::now_v7().simple()));
        tokio::fs::write(&tmp, &buf)
            .await
            .map_err(|e| io_error("write cache entry", &tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            remove_quietly(&tmp).await;
            return Err(io_error("commit cache entry", &path, e));
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let live = self.read(key).await?.is_some();
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(live),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error("delete cache entry", &path, e)),
        }
    }
}

impl Cache for FileCache {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Bytes>>> {
        Box::pin(self.read(key))
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.write(key, value, ttl))
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(self.remove(key))
    }
}

fn io_error(action: &str, path: &Path, source: std::io::Error) -> Error {
    Error::resource_with_source("cache", format!("{action} {}", path.display()), source)
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != IoErrorKind::NotFound {
            tracing::debug!(path = %path.display(), error = %e, "failed to remove cache file");
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, duration_millis)
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).await.unwrap();

        cache
            .set("user:1", Bytes::from_static(b"alice"), None)
            .await
            .unwrap();
        assert_eq!(
            cache.get("user:1").await.unwrap(),
            Some(Bytes::from_static(b"alice"))
        );
        assert!(cache.delete("user:1").await.unwrap());
        assert!(cache.get("user:1").await.unwrap().is_none());
        assert!(!cache.delete("user:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        FileCache::open(dir.path())
            .await
            .unwrap()
            .set("k", Bytes::from_static(b"v"), None)
            .await
            .unwrap();

        let reopened = FileCache::open(dir.path()).await.unwrap();
        assert_eq!(
            reopened.get("k").await.unwrap(),
            Some(Bytes::from_static(b"v"))
        );
    }

    #[tokio::test]
    async fn test_expired_entry_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).await.unwrap();
        cache
            .set("k", Bytes::from_static(b"v"), Some(Duration::from_millis(1)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(cache.get("k").await.unwrap().is_none());
        assert!(!cache.path_for("k").exists());
    }

    #[tokio::test]
    async fn test_keys_map_to_safe_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path()).await.unwrap();
        let path = cache.path_for("../../etc/passwd");
        assert_eq!(path.parent(), Some(dir.path()));
        assert_eq!(path.file_name().unwrap().len(), 40);
    }
}
