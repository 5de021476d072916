//! # peerbox-core
//!
//! The peer protocol engine: connection admission and handshake, the command
//! dispatcher, the chunked file-transfer state machine, and the peer-capacity
//! policy.
//!
//! ## Architecture
//!
//! ```text
//!  inbound TCP ──► handshake::accept ──► PeerRegistry (try_admit)
//!                                            │
//!                                            ▼
//!                                       Dispatcher (one read loop)
//!                                      ┌──────┴────────┐
//!                                      ▼               ▼
//!                                ReceiveSession   serve_request
//!                               (wants bytes)    (owns bytes)
//!
//!  local fs event ──► translator::broadcast ──► every peer's MessageSender
//! ```
//!
//! All writes to one connection go through its single [`MessageSender`]
//! queue, drained by one writer task; handlers and transfer sessions enqueue,
//! they never touch the socket.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod fs;
pub mod handshake;
pub mod registry;
pub mod transfer;
pub mod translator;

pub use connection::{spawn_writer, HandshakeState, MessageReader, MessageSender};
pub use dispatcher::{Dispatcher, ProtocolConfig};
pub use error::{CoreError, HandshakeError};
pub use fs::{Applied, FsError, MemoryFileSystem, SyncFileSystem};
pub use registry::{Admission, PeerRegistry};
pub use transfer::{chunk_len, ReceiveSession, SessionStatus, SessionStep};
pub use translator::{broadcast, request_for, FileSystemEvent};
