//! Streaming content fingerprints for on-disk files.

use std::path::Path;
use std::time::UNIX_EPOCH;

use peerbox_types::FileDescriptor;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

const READ_CHUNK: usize = 64 * 1024;

/// Fingerprint a file's content without loading it whole.
pub async fn file_digest(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Build a wire descriptor for the file at `path`.
pub async fn describe(path: &Path) -> std::io::Result<FileDescriptor> {
    let meta = tokio::fs::metadata(path).await?;
    let last_modified = meta
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let md5 = file_digest(path).await?;
    Ok(FileDescriptor::new(md5, last_modified, meta.len()))
}
