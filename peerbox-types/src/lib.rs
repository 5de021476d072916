//! # peerbox-types
//!
//! Wire format types for the peerbox peer-to-peer file-synchronization
//! protocol.
//!
//! The protocol is one JSON object per line, UTF-8, newline-terminated, over
//! a long-lived TCP stream. Every message carries a `command` field naming
//! the protocol verb. This crate provides:
//! - [`PeerAddress`], [`FileDescriptor`] - identity and content types
//! - [`Message`] - the protocol verbs and their payloads
//! - [`encode_line`] / [`decode_line`] - the line codec
//! - [`DecodeError`] - codec failure taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

mod address;
mod codec;
mod descriptor;
mod messages;

pub use address::{AddressParseError, PeerAddress};
pub use codec::{decode_line, encode_line, DecodeError, EncodeError, MAX_LINE_BYTES};
pub use descriptor::FileDescriptor;
pub use messages::{
    ConnectionRefused, DirectoryCreateRequest, DirectoryCreateResponse, DirectoryDeleteRequest,
    DirectoryDeleteResponse, FileBytesRequest, FileBytesResponse, FileCreateRequest,
    FileCreateResponse, FileDeleteRequest, FileDeleteResponse, FileModifyRequest,
    FileModifyResponse, HandshakeRequest, HandshakeResponse, InvalidProtocol, Message,
};
