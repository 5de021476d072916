//! Local filesystem backend for the peerbox protocol engine.
//!
//! [`LocalFileSystem`] grounds the engine's filesystem trait in a real
//! directory tree, with every wire path confined to a single share root.
//! [`watcher`] polls that root and turns observed differences into the
//! events the engine broadcasts to peers.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod hash;
pub mod local;
pub mod watcher;

pub use local::LocalFileSystem;
pub use watcher::{ScanSnapshot, Watcher};
