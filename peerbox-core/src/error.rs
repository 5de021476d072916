//! Error types for the protocol engine.

use peerbox_types::{DecodeError, EncodeError, PeerAddress};

/// Errors terminating a connection task.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Transport failure on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding an outbound message failed.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// The connection's writer task is gone; nothing further can be sent.
    #[error("connection closed")]
    ConnectionClosed,

    /// The peer exceeded the allowed number of protocol violations.
    #[error("too many protocol violations ({count})")]
    TooManyViolations {
        /// Violations observed before giving up.
        count: u32,
    },
}

/// Outcomes of a failed handshake attempt. Every variant means the socket
/// must be closed by the caller.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// The first message violated the handshake protocol; an
    /// `INVALID_PROTOCOL` reply was already sent.
    #[error("handshake violation: {reply}")]
    Violation {
        /// The explanation sent to the peer.
        reply: String,
    },

    /// This node is at capacity; a `CONNECTION_REFUSED` reply was already sent.
    #[error("registry full, connection refused")]
    RegistryFull,

    /// The remote node refused us and offered its peer list as a bootstrap hint.
    #[error("remote peer refused connection ({} known peers offered)", peers.len())]
    RemoteRefused {
        /// Peers the refusing node suggested trying instead.
        peers: Vec<PeerAddress>,
    },

    /// The remote node answered `INVALID_PROTOCOL`.
    #[error("remote peer rejected handshake: {message}")]
    RemoteRejected {
        /// The remote's explanation.
        message: String,
    },

    /// The remote answered the handshake with something other than a
    /// handshake outcome.
    #[error("unexpected handshake reply: {command}")]
    UnexpectedReply {
        /// The command that arrived instead.
        command: String,
    },

    /// The handshake reply could not be decoded.
    #[error("undecodable handshake reply: {0}")]
    Decode(#[from] DecodeError),

    /// No handshake message arrived within the allowed window.
    #[error("handshake timed out")]
    Timeout,

    /// The stream closed before the handshake completed.
    #[error("connection closed during handshake")]
    ConnectionClosed,

    /// Transport failure during the handshake.
    #[error("I/O error during handshake: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CoreError> for HandshakeError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Io(e) => HandshakeError::Io(e),
            _ => HandshakeError::ConnectionClosed,
        }
    }
}
