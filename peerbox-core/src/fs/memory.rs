//! In-memory filesystem double for protocol tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use peerbox_types::FileDescriptor;

use super::{fingerprint, Applied, FsError, SyncFileSystem};

#[derive(Default)]
struct Inner {
    files: HashMap<String, Vec<u8>>,
    dirs: HashSet<String>,
}

/// A [`SyncFileSystem`] backed by in-memory maps.
///
/// Behaves like the disk implementation for everything the protocol engine
/// observes: shortcut detection, range checks, create-conflict errors.
#[derive(Default)]
pub struct MemoryFileSystem {
    inner: Mutex<Inner>,
}

impl MemoryFileSystem {
    /// Create an empty filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file, returning its descriptor.
    pub fn insert_file(&self, path: &str, bytes: &[u8]) -> FileDescriptor {
        let mut inner = self.inner.lock().expect("memory fs mutex poisoned");
        inner.files.insert(path.to_owned(), bytes.to_vec());
        FileDescriptor::new(fingerprint(bytes), 0, bytes.len() as u64)
    }

    /// Current content of a file, if present.
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        let inner = self.inner.lock().expect("memory fs mutex poisoned");
        inner.files.get(path).cloned()
    }

    /// Whether a directory exists.
    pub fn is_dir(&self, path: &str) -> bool {
        let inner = self.inner.lock().expect("memory fs mutex poisoned");
        inner.dirs.contains(path)
    }
}

#[async_trait]
impl SyncFileSystem for MemoryFileSystem {
    async fn create_file(
        &self,
        descriptor: &FileDescriptor,
        path: &str,
    ) -> Result<Applied, FsError> {
        let mut inner = self.inner.lock().expect("memory fs mutex poisoned");
        if let Some(existing) = inner.files.get(path) {
            if fingerprint(existing) == descriptor.md5 {
                return Ok(Applied { shortcut: true });
            }
            return Err(FsError::AlreadyExists {
                path: path.to_owned(),
            });
        }
        inner
            .files
            .insert(path.to_owned(), vec![0; descriptor.file_size as usize]);
        Ok(Applied { shortcut: false })
    }

    async fn modify_file(
        &self,
        descriptor: &FileDescriptor,
        path: &str,
    ) -> Result<Applied, FsError> {
        let mut inner = self.inner.lock().expect("memory fs mutex poisoned");
        let existing = inner.files.get_mut(path).ok_or_else(|| FsError::NotFound {
            path: path.to_owned(),
        })?;
        if fingerprint(existing) == descriptor.md5 {
            return Ok(Applied { shortcut: true });
        }
        existing.clear();
        existing.resize(descriptor.file_size as usize, 0);
        Ok(Applied { shortcut: false })
    }

    async fn delete_file(&self, _descriptor: &FileDescriptor, path: &str) -> Result<(), FsError> {
        let mut inner = self.inner.lock().expect("memory fs mutex poisoned");
        inner
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| FsError::NotFound {
                path: path.to_owned(),
            })
    }

    async fn create_directory(&self, path: &str) -> Result<(), FsError> {
        let mut inner = self.inner.lock().expect("memory fs mutex poisoned");
        if !inner.dirs.insert(path.to_owned()) {
            return Err(FsError::AlreadyExists {
                path: path.to_owned(),
            });
        }
        Ok(())
    }

    async fn delete_directory(&self, path: &str) -> Result<(), FsError> {
        let mut inner = self.inner.lock().expect("memory fs mutex poisoned");
        if !inner.dirs.remove(path) {
            return Err(FsError::NotFound {
                path: path.to_owned(),
            });
        }
        let prefix = format!("{path}/");
        inner.files.retain(|p, _| !p.starts_with(&prefix));
        inner.dirs.retain(|p| !p.starts_with(&prefix));
        Ok(())
    }

    async fn read_bytes(
        &self,
        path: &str,
        position: u64,
        length: u64,
    ) -> Result<Vec<u8>, FsError> {
        let inner = self.inner.lock().expect("memory fs mutex poisoned");
        let file = inner.files.get(path).ok_or_else(|| FsError::NotFound {
            path: path.to_owned(),
        })?;
        let end = position
            .checked_add(length)
            .filter(|end| *end <= file.len() as u64)
            .ok_or(FsError::OutOfRange {
                path: path.to_owned(),
                position,
                length,
                file_size: file.len() as u64,
            })?;
        Ok(file[position as usize..end as usize].to_vec())
    }

    async fn write_bytes(&self, path: &str, position: u64, bytes: &[u8]) -> Result<(), FsError> {
        let mut inner = self.inner.lock().expect("memory fs mutex poisoned");
        let file = inner.files.get_mut(path).ok_or_else(|| FsError::NotFound {
            path: path.to_owned(),
        })?;
        let end = position
            .checked_add(bytes.len() as u64)
            .filter(|end| *end <= file.len() as u64)
            .ok_or(FsError::OutOfRange {
                path: path.to_owned(),
                position,
                length: bytes.len() as u64,
                file_size: file.len() as u64,
            })?;
        file[position as usize..end as usize].copy_from_slice(bytes);
        Ok(())
    }
}
