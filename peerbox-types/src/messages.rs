//! Protocol messages for peerbox.
//!
//! Each variant is one protocol verb; the wire representation is a JSON
//! object whose `command` field carries the variant name.

use serde::{Deserialize, Serialize};

use crate::{FileDescriptor, PeerAddress};

/// All protocol messages.
///
/// Messages are ephemeral: constructed, sent over one line, and discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Opens a connection; first message on the wire.
    HandshakeRequest(HandshakeRequest),
    /// Positive handshake outcome carrying the responder's own address.
    HandshakeResponse(HandshakeResponse),
    /// Negative handshake outcome: responder is at capacity.
    ConnectionRefused(ConnectionRefused),
    /// Protocol violation report, sent by either side.
    InvalidProtocol(InvalidProtocol),
    /// Ask the peer to create a file.
    FileCreateRequest(FileCreateRequest),
    /// Outcome of a file create.
    FileCreateResponse(FileCreateResponse),
    /// Ask the peer to delete a file.
    FileDeleteRequest(FileDeleteRequest),
    /// Outcome of a file delete.
    FileDeleteResponse(FileDeleteResponse),
    /// Ask the peer to overwrite a file with new content.
    FileModifyRequest(FileModifyRequest),
    /// Outcome of a file modify.
    FileModifyResponse(FileModifyResponse),
    /// Ask the peer to create a directory.
    DirectoryCreateRequest(DirectoryCreateRequest),
    /// Outcome of a directory create.
    DirectoryCreateResponse(DirectoryCreateResponse),
    /// Ask the peer to delete a directory.
    DirectoryDeleteRequest(DirectoryDeleteRequest),
    /// Outcome of a directory delete.
    DirectoryDeleteResponse(DirectoryDeleteResponse),
    /// Ask the peer for a byte range of a file it holds.
    FileBytesRequest(FileBytesRequest),
    /// A byte range of a file, or a report that the range could not be read.
    FileBytesResponse(FileBytesResponse),
}

impl Message {
    /// Every recognized `command` value, in routing-table order.
    pub const KNOWN_COMMANDS: [&'static str; 16] = [
        "HANDSHAKE_REQUEST",
        "HANDSHAKE_RESPONSE",
        "CONNECTION_REFUSED",
        "INVALID_PROTOCOL",
        "FILE_CREATE_REQUEST",
        "FILE_CREATE_RESPONSE",
        "FILE_DELETE_REQUEST",
        "FILE_DELETE_RESPONSE",
        "FILE_MODIFY_REQUEST",
        "FILE_MODIFY_RESPONSE",
        "DIRECTORY_CREATE_REQUEST",
        "DIRECTORY_CREATE_RESPONSE",
        "DIRECTORY_DELETE_REQUEST",
        "DIRECTORY_DELETE_RESPONSE",
        "FILE_BYTES_REQUEST",
        "FILE_BYTES_RESPONSE",
    ];

    /// The `command` value this message carries on the wire.
    pub fn command(&self) -> &'static str {
        match self {
            Message::HandshakeRequest(_) => "HANDSHAKE_REQUEST",
            Message::HandshakeResponse(_) => "HANDSHAKE_RESPONSE",
            Message::ConnectionRefused(_) => "CONNECTION_REFUSED",
            Message::InvalidProtocol(_) => "INVALID_PROTOCOL",
            Message::FileCreateRequest(_) => "FILE_CREATE_REQUEST",
            Message::FileCreateResponse(_) => "FILE_CREATE_RESPONSE",
            Message::FileDeleteRequest(_) => "FILE_DELETE_REQUEST",
            Message::FileDeleteResponse(_) => "FILE_DELETE_RESPONSE",
            Message::FileModifyRequest(_) => "FILE_MODIFY_REQUEST",
            Message::FileModifyResponse(_) => "FILE_MODIFY_RESPONSE",
            Message::DirectoryCreateRequest(_) => "DIRECTORY_CREATE_REQUEST",
            Message::DirectoryCreateResponse(_) => "DIRECTORY_CREATE_RESPONSE",
            Message::DirectoryDeleteRequest(_) => "DIRECTORY_DELETE_REQUEST",
            Message::DirectoryDeleteResponse(_) => "DIRECTORY_DELETE_RESPONSE",
            Message::FileBytesRequest(_) => "FILE_BYTES_REQUEST",
            Message::FileBytesResponse(_) => "FILE_BYTES_RESPONSE",
        }
    }

    /// Build an `INVALID_PROTOCOL` message.
    pub fn invalid_protocol(message: impl Into<String>) -> Self {
        Message::InvalidProtocol(InvalidProtocol {
            message: message.into(),
        })
    }
}

/// `HANDSHAKE_REQUEST` payload: the requester's advertised address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeRequest {
    /// Address the requester listens on.
    pub host_port: PeerAddress,
}

/// `HANDSHAKE_RESPONSE` payload: the responder's advertised address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResponse {
    /// Address the responder listens on.
    pub host_port: PeerAddress,
}

/// `CONNECTION_REFUSED` payload: the peer list the requester may try instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRefused {
    /// Human-readable refusal reason. Advisory; peers may omit it.
    #[serde(default)]
    pub message: String,
    /// Currently admitted peers, offered as a bootstrap hint.
    pub peers: Vec<PeerAddress>,
}

/// `INVALID_PROTOCOL` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidProtocol {
    /// Description of the violation.
    pub message: String,
}

/// `FILE_CREATE_REQUEST` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCreateRequest {
    /// Identity and fingerprint of the file to create.
    pub file_descriptor: FileDescriptor,
    /// Path relative to the share root.
    pub path_name: String,
}

/// `FILE_CREATE_RESPONSE` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCreateResponse {
    /// Descriptor echoed from the request.
    pub file_descriptor: FileDescriptor,
    /// Path echoed from the request.
    pub path_name: String,
    /// Whether the create was accepted.
    pub status: bool,
    /// Human-readable outcome.
    pub message: String,
}

/// `FILE_DELETE_REQUEST` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDeleteRequest {
    /// Descriptor of the file as the sender last saw it.
    pub file_descriptor: FileDescriptor,
    /// Path relative to the share root.
    pub path_name: String,
}

/// `FILE_DELETE_RESPONSE` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDeleteResponse {
    /// Descriptor echoed from the request.
    pub file_descriptor: FileDescriptor,
    /// Path echoed from the request.
    pub path_name: String,
    /// Whether the delete succeeded.
    pub status: bool,
    /// Human-readable outcome.
    pub message: String,
}

/// `FILE_MODIFY_REQUEST` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileModifyRequest {
    /// Descriptor of the new content.
    pub file_descriptor: FileDescriptor,
    /// Path relative to the share root.
    pub path_name: String,
}

/// `FILE_MODIFY_RESPONSE` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileModifyResponse {
    /// Descriptor echoed from the request.
    pub file_descriptor: FileDescriptor,
    /// Path echoed from the request.
    pub path_name: String,
    /// Whether the modify was accepted.
    pub status: bool,
    /// Human-readable outcome.
    pub message: String,
}

/// `DIRECTORY_CREATE_REQUEST` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryCreateRequest {
    /// Path relative to the share root.
    pub path_name: String,
}

/// `DIRECTORY_CREATE_RESPONSE` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryCreateResponse {
    /// Path echoed from the request.
    pub path_name: String,
    /// Whether the create succeeded.
    pub status: bool,
    /// Human-readable outcome.
    pub message: String,
}

/// `DIRECTORY_DELETE_REQUEST` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryDeleteRequest {
    /// Path relative to the share root.
    pub path_name: String,
}

/// `DIRECTORY_DELETE_RESPONSE` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryDeleteResponse {
    /// Path echoed from the request.
    pub path_name: String,
    /// Whether the delete succeeded.
    pub status: bool,
    /// Human-readable outcome.
    pub message: String,
}

/// `FILE_BYTES_REQUEST` payload: one byte range of one file.
///
/// Invariant: `position + length <= file_descriptor.file_size`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileBytesRequest {
    /// Descriptor of the file being transferred.
    pub file_descriptor: FileDescriptor,
    /// Path relative to the share root.
    pub path_name: String,
    /// Offset of the first requested byte.
    pub position: u64,
    /// Number of bytes requested.
    pub length: u64,
}

/// `FILE_BYTES_RESPONSE` payload.
///
/// `content` is base64 and present exactly when `status` is true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileBytesResponse {
    /// Descriptor echoed from the request.
    pub file_descriptor: FileDescriptor,
    /// Path echoed from the request.
    pub path_name: String,
    /// Offset echoed from the request.
    pub position: u64,
    /// Number of bytes echoed from the request.
    pub length: u64,
    /// Base64-encoded bytes, when the read succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Whether the read succeeded.
    pub status: bool,
    /// Human-readable outcome. Advisory; peers may omit it.
    #[serde(default)]
    pub message: String,
}
