//! File identity and content fingerprint.

use serde::{Deserialize, Serialize};

/// Describes a file's identity and content at a point in time.
///
/// Supplied by the filesystem collaborator and treated as opaque by the
/// protocol engine. The `md5` field keeps its historical wire name but
/// carries whatever fingerprint the filesystem computes; peers only ever
/// compare it for equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    /// Content fingerprint, hex-encoded.
    pub md5: String,
    /// Last-modified time, milliseconds since the epoch.
    pub last_modified: u64,
    /// Total file size in bytes.
    pub file_size: u64,
}

impl FileDescriptor {
    /// Create a descriptor.
    pub fn new(md5: impl Into<String>, last_modified: u64, file_size: u64) -> Self {
        Self {
            md5: md5.into(),
            last_modified,
            file_size,
        }
    }
}
