//! Filesystem collaborator seam.
//!
//! The protocol engine never touches the disk itself; it calls this trait.
//! A disk-backed implementation lives in `peerbox-fs`; [`MemoryFileSystem`]
//! here is the in-memory double the engine's own tests run against.

mod memory;

pub use memory::MemoryFileSystem;

use async_trait::async_trait;
use peerbox_types::FileDescriptor;
use sha2::{Digest, Sha256};

/// Result of accepting a create or modify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    /// The destination already held byte-identical content, so no byte
    /// exchange is needed.
    pub shortcut: bool,
}

/// Failures surfaced by a filesystem collaborator.
///
/// These are reported to the remote peer as `status: false` responses; they
/// never tear down a connection.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    /// The path does not exist.
    #[error("path not found: {path}")]
    NotFound {
        /// The missing path.
        path: String,
    },

    /// The path already exists and holds different content.
    #[error("path already exists: {path}")]
    AlreadyExists {
        /// The conflicting path.
        path: String,
    },

    /// The path is absolute, escapes the share root, or is otherwise unsafe.
    #[error("unsafe path rejected: {path}")]
    UnsafePath {
        /// The rejected path.
        path: String,
    },

    /// A byte range falls outside the file.
    #[error("range {position}+{length} out of bounds for {path} ({file_size} bytes)")]
    OutOfRange {
        /// The file being accessed.
        path: String,
        /// Requested offset.
        position: u64,
        /// Requested length.
        length: u64,
        /// Actual size of the file.
        file_size: u64,
    },

    /// Underlying I/O failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The path being accessed.
        path: String,
        /// The OS error.
        #[source]
        source: std::io::Error,
    },
}

/// The filesystem operations the protocol engine consumes.
#[async_trait]
pub trait SyncFileSystem: Send + Sync {
    /// Prepare a file at `path` to receive `descriptor.file_size` bytes.
    ///
    /// Returns `Applied { shortcut: true }` when identical content is
    /// already in place and no bytes need transferring.
    async fn create_file(&self, descriptor: &FileDescriptor, path: &str)
        -> Result<Applied, FsError>;

    /// Prepare an existing file at `path` for replacement content.
    async fn modify_file(&self, descriptor: &FileDescriptor, path: &str)
        -> Result<Applied, FsError>;

    /// Delete the file at `path`.
    async fn delete_file(&self, descriptor: &FileDescriptor, path: &str) -> Result<(), FsError>;

    /// Create the directory at `path`.
    async fn create_directory(&self, path: &str) -> Result<(), FsError>;

    /// Delete the directory at `path` and everything under it.
    async fn delete_directory(&self, path: &str) -> Result<(), FsError>;

    /// Read exactly `length` bytes at `position`.
    async fn read_bytes(&self, path: &str, position: u64, length: u64)
        -> Result<Vec<u8>, FsError>;

    /// Write `bytes` at `position` into a file prepared by create/modify.
    async fn write_bytes(&self, path: &str, position: u64, bytes: &[u8]) -> Result<(), FsError>;
}

/// Content fingerprint: SHA-256, hex-encoded.
///
/// Carried in the descriptor's `md5` wire field; peers only compare it.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
