//! Polling change scanner for the share root.
//!
//! The scanner takes periodic snapshots of the tree and diffs consecutive
//! snapshots into the events the protocol engine broadcasts. Diff order is
//! chosen so a peer replaying the events never sees a child before its
//! parent: directories first among creations, directories last among
//! deletions.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use peerbox_core::translator::FileSystemEvent;
use peerbox_types::FileDescriptor;
use tokio::sync::mpsc;

use crate::hash::describe;

/// One point-in-time view of the share root.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanSnapshot {
    files: BTreeMap<String, FileDescriptor>,
    dirs: BTreeSet<String>,
}

impl ScanSnapshot {
    /// Snapshot everything under `root`.
    ///
    /// Entries that vanish mid-scan are skipped; the next scan reports
    /// them as deletions.
    pub async fn scan(root: &Path) -> std::io::Result<Self> {
        let mut snapshot = ScanSnapshot::default();
        let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let Some(relative) = wire_path(root, &path) else {
                    continue;
                };
                let file_type = match entry.file_type().await {
                    Ok(t) => t,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(e),
                };
                if file_type.is_dir() {
                    snapshot.dirs.insert(relative);
                    pending.push(path);
                } else if file_type.is_file() {
                    match describe(&path).await {
                        Ok(descriptor) => {
                            snapshot.files.insert(relative, descriptor);
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e),
                    }
                }
                // Symlinks and special files are left out of the sync set.
            }
        }
        Ok(snapshot)
    }

    /// Events that turn `self` into `next`.
    pub fn diff(&self, next: &ScanSnapshot) -> Vec<FileSystemEvent> {
        let mut events = Vec::new();

        let mut new_dirs: Vec<&String> =
            next.dirs.difference(&self.dirs).collect();
        new_dirs.sort_by_key(|d| d.matches('/').count());
        for dir in new_dirs {
            events.push(FileSystemEvent::DirectoryCreated { path: dir.clone() });
        }

        for (path, descriptor) in &next.files {
            match self.files.get(path) {
                None => events.push(FileSystemEvent::FileCreated {
                    descriptor: descriptor.clone(),
                    path: path.clone(),
                }),
                Some(previous) if previous.md5 != descriptor.md5 => {
                    events.push(FileSystemEvent::FileModified {
                        descriptor: descriptor.clone(),
                        path: path.clone(),
                    })
                }
                Some(_) => {}
            }
        }

        for (path, descriptor) in &self.files {
            if !next.files.contains_key(path) {
                events.push(FileSystemEvent::FileDeleted {
                    descriptor: descriptor.clone(),
                    path: path.clone(),
                });
            }
        }

        let mut gone_dirs: Vec<&String> =
            self.dirs.difference(&next.dirs).collect();
        gone_dirs.sort_by_key(|d| std::cmp::Reverse(d.matches('/').count()));
        for dir in gone_dirs {
            events.push(FileSystemEvent::DirectoryDeleted { path: dir.clone() });
        }

        events
    }

    /// Events announcing this snapshot's entire content, as used when a
    /// node comes up and must offer what it already holds.
    pub fn initial_events(&self) -> Vec<FileSystemEvent> {
        ScanSnapshot::default().diff(self)
    }
}

fn wire_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        parts.push(component.as_os_str().to_str()?.to_owned());
    }
    Some(parts.join("/"))
}

/// Periodic scanner pushing change events into a channel.
pub struct Watcher {
    root: PathBuf,
    interval: Duration,
}

impl Watcher {
    /// Watch `root`, rescanning every `interval`.
    pub fn new(root: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            root: root.into(),
            interval,
        }
    }

    /// Scan until the receiving side hangs up.
    ///
    /// The first scan's content is emitted as creation events, then each
    /// subsequent scan emits only the differences.
    pub async fn run(self, events: mpsc::Sender<FileSystemEvent>) {
        let mut previous = ScanSnapshot::default();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let current = match ScanSnapshot::scan(&self.root).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::warn!(root = %self.root.display(), "scan failed: {}", e);
                    continue;
                }
            };
            for event in previous.diff(&current) {
                tracing::debug!(path = event.path(), "change detected");
                if events.send(event).await.is_err() {
                    tracing::info!("event channel closed, scanner stopping");
                    return;
                }
            }
            previous = current;
        }
    }

    /// Spawn [`run`](Self::run) on the runtime.
    pub fn spawn(self, events: mpsc::Sender<FileSystemEvent>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(events))
    }
}
