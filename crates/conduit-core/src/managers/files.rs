//! Root-confined file access.

use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use tokio::fs::{File, OpenOptions};

use crate::error::{Error, Result};

/// Opens files beneath a single root directory.
///
/// Relative paths are resolved against the root; absolute paths and `..`
/// components are rejected, so a request can never reach outside it.
/// Handles opened through [`Context::open_file`](crate::Context::open_file)
/// are closed when the request is released.
#[derive(Debug, Clone)]
pub struct FileManager {
    root: PathBuf,
}

impl FileManager {
    /// Creates a manager rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `relative` beneath the root.
    ///
    /// ```
    /// use conduit_core::managers::FileManager;
    ///
    /// let files = FileManager::new("/srv/uploads");
    /// assert!(files.resolve("avatars/1.png").is_ok());
    /// assert!(files.resolve("../etc/passwd").is_err());
    /// assert!(files.resolve("/etc/passwd").is_err());
    /// ```
    pub fn resolve(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let relative = relative.as_ref();
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::bad_request(format!(
                        "path `{}` escapes the file root",
                        relative.display()
                    )));
                }
            }
        }
        if resolved == self.root {
            return Err(Error::bad_request("empty file path"));
        }
        Ok(resolved)
    }

    /// Opens an existing file for reading.
    pub async fn open(&self, relative: impl AsRef<Path>) -> Result<File> {
        let path = self.resolve(relative)?;
        File::open(&path).await.map_err(|e| io_error("open", &path, e))
    }

    /// Creates or truncates a file for writing, creating parent directories.
    pub async fn create(&self, relative: impl AsRef<Path>) -> Result<File> {
        let path = self.resolve(relative)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("create directory", parent, e))?;
        }
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await
            .map_err(|e| io_error("create", &path, e))
    }

    /// Reads a whole file.
    pub async fn read(&self, relative: impl AsRef<Path>) -> Result<Bytes> {
        let path = self.resolve(relative)?;
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| io_error("read", &path, e))
    }

    /// Writes a whole file, creating parent directories.
    pub async fn write(&self, relative: impl AsRef<Path>, contents: &[u8]) -> Result<()> {
        let path = self.resolve(relative)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("create directory", parent, e))?;
        }
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| io_error("write", &path, e))
    }
}

fn io_error(action: &str, path: &Path, source: std::io::Error) -> Error {
    if source.kind() == std::io::ErrorKind::NotFound {
        return Error::http(http::StatusCode::NOT_FOUND, "file not found");
    }
    Error::resource_with_source("files", format!("{action} {}", path.display()), source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileManager::new(dir.path());

        files.write("a/b/c.txt", b"hello").await.unwrap();
        assert_eq!(files.read("a/b/c.txt").await.unwrap(), Bytes::from_static(b"hello"));

        let mut file = files.create("d.txt").await.unwrap();
        file.write_all(b"streamed").await.unwrap();
        file.flush().await.unwrap();
        drop(file);

        let mut contents = String::new();
        files
            .open("./d.txt")
            .await
            .unwrap()
            .read_to_string(&mut contents)
            .await
            .unwrap();
        assert_eq!(contents, "streamed");
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileManager::new(dir.path()).read("nope").await.unwrap_err();
        assert_eq!(err.status(), http::StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_resolve_rejects_escape() {
        let files = FileManager::new("/root");
        assert!(files.resolve("a/../../b").is_err());
        assert!(files.resolve("").is_err());
        assert!(files.resolve(".").is_err());
    }
}
