//! Daemon wiring for peerbox: configuration, listener, outbound
//! connector, and the share-root scanner pump.
//!
//! The protocol engine itself lives in `peerbox-core`; this crate only
//! assembles it around real sockets and a real share directory.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod node;

pub use config::{Config, ConfigError};
pub use node::{BoundNode, Node};
