//! Share-root-confined implementation of the engine's filesystem trait.

use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use peerbox_core::fs::{Applied, FsError, SyncFileSystem};
use peerbox_types::FileDescriptor;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::hash::file_digest;

/// Filesystem backend rooted at a single share directory.
///
/// Wire paths are relative, forward-slash separated, and may never name
/// anything outside the root. Incoming files are pre-allocated to their
/// final size, then filled in place by positioned writes.
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    root: PathBuf,
}

impl LocalFileSystem {
    /// Serve files under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The share root this backend serves.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a wire path onto the share root, rejecting anything that could
    /// escape it.
    fn resolve(&self, path: &str) -> Result<PathBuf, FsError> {
        let unsafe_path = || FsError::UnsafePath {
            path: path.to_owned(),
        };
        if path.is_empty() || path.contains('\\') {
            return Err(unsafe_path());
        }
        let relative = Path::new(path);
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                _ => return Err(unsafe_path()),
            }
        }
        Ok(resolved)
    }

    async fn digest_matches(
        &self,
        resolved: &Path,
        path: &str,
        descriptor: &FileDescriptor,
    ) -> Result<bool, FsError> {
        let digest = file_digest(resolved)
            .await
            .map_err(|e| io_error(path, e))?;
        Ok(digest == descriptor.md5)
    }
}

fn io_error(path: &str, source: std::io::Error) -> FsError {
    match source.kind() {
        std::io::ErrorKind::NotFound => FsError::NotFound {
            path: path.to_owned(),
        },
        std::io::ErrorKind::AlreadyExists => FsError::AlreadyExists {
            path: path.to_owned(),
        },
        _ => FsError::Io {
            path: path.to_owned(),
            source,
        },
    }
}

#[async_trait]
impl SyncFileSystem for LocalFileSystem {
    async fn create_file(
        &self,
        descriptor: &FileDescriptor,
        path: &str,
    ) -> Result<Applied, FsError> {
        let resolved = self.resolve(path)?;
        if resolved.is_dir() {
            return Err(FsError::AlreadyExists {
                path: path.to_owned(),
            });
        }
        if resolved.is_file() {
            if self.digest_matches(&resolved, path, descriptor).await? {
                tracing::debug!(path, "create satisfied by identical local content");
                return Ok(Applied { shortcut: true });
            }
            return Err(FsError::AlreadyExists {
                path: path.to_owned(),
            });
        }
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&resolved)
            .await
            .map_err(|e| io_error(path, e))?;
        file.set_len(descriptor.file_size)
            .await
            .map_err(|e| io_error(path, e))?;
        tracing::debug!(path, size = descriptor.file_size, "file pre-allocated");
        Ok(Applied { shortcut: false })
    }

    async fn modify_file(
        &self,
        descriptor: &FileDescriptor,
        path: &str,
    ) -> Result<Applied, FsError> {
        let resolved = self.resolve(path)?;
        if !resolved.is_file() {
            return Err(FsError::NotFound {
                path: path.to_owned(),
            });
        }
        if self.digest_matches(&resolved, path, descriptor).await? {
            tracing::debug!(path, "modify satisfied, content already current");
            return Ok(Applied { shortcut: true });
        }
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&resolved)
            .await
            .map_err(|e| io_error(path, e))?;
        file.set_len(descriptor.file_size)
            .await
            .map_err(|e| io_error(path, e))?;
        tracing::debug!(path, size = descriptor.file_size, "file resized for rewrite");
        Ok(Applied { shortcut: false })
    }

    async fn delete_file(&self, _descriptor: &FileDescriptor, path: &str) -> Result<(), FsError> {
        let resolved = self.resolve(path)?;
        if !resolved.is_file() {
            return Err(FsError::NotFound {
                path: path.to_owned(),
            });
        }
        tokio::fs::remove_file(&resolved)
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn create_directory(&self, path: &str) -> Result<(), FsError> {
        let resolved = self.resolve(path)?;
        tokio::fs::create_dir(&resolved)
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn delete_directory(&self, path: &str) -> Result<(), FsError> {
        let resolved = self.resolve(path)?;
        if !resolved.is_dir() {
            return Err(FsError::NotFound {
                path: path.to_owned(),
            });
        }
        tokio::fs::remove_dir_all(&resolved)
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn read_bytes(
        &self,
        path: &str,
        position: u64,
        length: u64,
    ) -> Result<Vec<u8>, FsError> {
        let resolved = self.resolve(path)?;
        let mut file = tokio::fs::File::open(&resolved)
            .await
            .map_err(|e| io_error(path, e))?;
        let file_size = file
            .metadata()
            .await
            .map_err(|e| io_error(path, e))?
            .len();
        if position.checked_add(length).map_or(true, |end| end > file_size) {
            return Err(FsError::OutOfRange {
                path: path.to_owned(),
                position,
                length,
                file_size,
            });
        }
        file.seek(SeekFrom::Start(position))
            .await
            .map_err(|e| io_error(path, e))?;
        let mut bytes = vec![0u8; length as usize];
        file.read_exact(&mut bytes)
            .await
            .map_err(|e| io_error(path, e))?;
        Ok(bytes)
    }

    async fn write_bytes(&self, path: &str, position: u64, bytes: &[u8]) -> Result<(), FsError> {
        let resolved = self.resolve(path)?;
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&resolved)
            .await
            .map_err(|e| io_error(path, e))?;
        let file_size = file
            .metadata()
            .await
            .map_err(|e| io_error(path, e))?
            .len();
        let length = bytes.len() as u64;
        if position.checked_add(length).map_or(true, |end| end > file_size) {
            return Err(FsError::OutOfRange {
                path: path.to_owned(),
                position,
                length,
                file_size,
            });
        }
        file.seek(SeekFrom::Start(position))
            .await
            .map_err(|e| io_error(path, e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| io_error(path, e))?;
        file.flush().await.map_err(|e| io_error(path, e))
    }
}
