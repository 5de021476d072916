//! Connection handshake: the first exchange on every connection.
//!
//! The accept side validates the first message field-by-field, consults the
//! registry atomically, and sends exactly one reply per attempt. The
//! initiate side sends `HANDSHAKE_REQUEST` and classifies whatever comes
//! back. Every error path means the caller closes the socket.

use std::time::Duration;

use peerbox_types::{
    decode_line, ConnectionRefused, HandshakeRequest, HandshakeResponse, Message, PeerAddress,
};
use serde_json::Value;
use tokio::io::AsyncRead;

use crate::connection::{MessageReader, MessageSender};
use crate::error::HandshakeError;
use crate::registry::{Admission, PeerRegistry};

/// A handshake-phase protocol violation and the reply it earns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Violation {
    MissingCommand,
    MissingHostPort,
    NotHandshake,
}

impl Violation {
    fn reply(self) -> &'static str {
        match self {
            Violation::MissingCommand => "message must contain a command field as string",
            Violation::MissingHostPort => "message must contain host and port for handshake",
            Violation::NotHandshake => "handshake is required",
        }
    }
}

/// Classify the first line of a connection.
///
/// Checks run in a fixed order: command present and a string, then
/// `hostPort` present and well-formed, then the command is actually
/// `HANDSHAKE_REQUEST`. Unparseable input counts as a missing command.
fn classify_request(line: &str) -> Result<PeerAddress, Violation> {
    let value: Value =
        serde_json::from_str(line).map_err(|_| Violation::MissingCommand)?;
    let object = value.as_object().ok_or(Violation::MissingCommand)?;
    let command = object
        .get("command")
        .and_then(Value::as_str)
        .ok_or(Violation::MissingCommand)?;
    let host_port = object.get("hostPort").ok_or(Violation::MissingHostPort)?;
    if command != "HANDSHAKE_REQUEST" {
        return Err(Violation::NotHandshake);
    }
    serde_json::from_value(host_port.clone()).map_err(|_| Violation::MissingHostPort)
}

async fn read_first_line<R: AsyncRead + Unpin>(
    reader: &mut MessageReader<R>,
    timeout: Duration,
) -> Result<String, HandshakeError> {
    match tokio::time::timeout(timeout, reader.next_line()).await {
        Err(_) => Err(HandshakeError::Timeout),
        Ok(Err(e)) => Err(e.into()),
        Ok(Ok(None)) => Err(HandshakeError::ConnectionClosed),
        Ok(Ok(Some(line))) => Ok(line),
    }
}

/// Run the accept side of the handshake on a new inbound connection.
///
/// On success the peer is admitted in the registry and `HANDSHAKE_RESPONSE`
/// has been sent; the connection belongs to the dispatcher next. On any
/// error the reply (if one is owed) has been sent and the caller closes the
/// socket.
pub async fn accept<R: AsyncRead + Unpin>(
    reader: &mut MessageReader<R>,
    sender: &MessageSender,
    registry: &PeerRegistry,
    local: &PeerAddress,
    timeout: Duration,
) -> Result<PeerAddress, HandshakeError> {
    let line = read_first_line(reader, timeout).await?;

    let peer = match classify_request(&line) {
        Ok(peer) => peer,
        Err(violation) => {
            sender
                .send(Message::invalid_protocol(violation.reply()))
                .await?;
            return Err(HandshakeError::Violation {
                reply: violation.reply().to_owned(),
            });
        }
    };

    match registry.try_admit(peer.clone(), sender) {
        Admission::Refused { peers } => {
            sender
                .send(Message::ConnectionRefused(ConnectionRefused {
                    message: "connection limit reached".into(),
                    peers,
                }))
                .await?;
            Err(HandshakeError::RegistryFull)
        }
        Admission::Admitted => {
            sender
                .send(Message::HandshakeResponse(HandshakeResponse {
                    host_port: local.clone(),
                }))
                .await?;
            tracing::info!(peer = %peer, "handshake succeeded");
            Ok(peer)
        }
    }
}

/// Run the initiate side of the handshake on a new outbound connection.
///
/// Sends `HANDSHAKE_REQUEST` advertising `local` and waits for the outcome.
/// A successful outbound handshake still goes through admission; if the
/// local registry is full the caller must drop the connection.
pub async fn initiate<R: AsyncRead + Unpin>(
    reader: &mut MessageReader<R>,
    sender: &MessageSender,
    registry: &PeerRegistry,
    local: &PeerAddress,
    timeout: Duration,
) -> Result<PeerAddress, HandshakeError> {
    sender
        .send(Message::HandshakeRequest(HandshakeRequest {
            host_port: local.clone(),
        }))
        .await?;

    let line = read_first_line(reader, timeout).await?;
    match decode_line(&line)? {
        Message::HandshakeResponse(response) => {
            let peer = response.host_port;
            match registry.try_admit(peer.clone(), sender) {
                Admission::Admitted => {
                    tracing::info!(peer = %peer, "outbound handshake succeeded");
                    Ok(peer)
                }
                Admission::Refused { .. } => {
                    tracing::warn!(peer = %peer, "local registry full after outbound handshake");
                    Err(HandshakeError::RegistryFull)
                }
            }
        }
        Message::ConnectionRefused(refused) => {
            tracing::info!(
                offered = refused.peers.len(),
                "outbound handshake refused: {}",
                refused.message
            );
            Err(HandshakeError::RemoteRefused {
                peers: refused.peers,
            })
        }
        Message::InvalidProtocol(invalid) => Err(HandshakeError::RemoteRejected {
            message: invalid.message,
        }),
        other => Err(HandshakeError::UnexpectedReply {
            command: other.command().to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::spawn_writer;
    use peerbox_types::encode_line;
    use tokio::io::AsyncWriteExt;

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn local() -> PeerAddress {
        PeerAddress::new("localhost", 8111)
    }

    /// Drive `accept` against a scripted remote: write `first_line`, then
    /// collect every reply the acceptor sends.
    async fn run_accept(
        first_line: &str,
        registry: &PeerRegistry,
    ) -> (Result<PeerAddress, HandshakeError>, Vec<Message>) {
        let (to_acceptor, from_remote) = tokio::io::duplex(8192);
        let (reply_stream, mut remote_write) = tokio::io::duplex(8192);

        remote_write
            .write_all(format!("{first_line}\n").as_bytes())
            .await
            .unwrap();

        let (sender, writer) = spawn_writer(to_acceptor);
        let mut reader = MessageReader::new(reply_stream);
        let result = accept(&mut reader, &sender, registry, &local(), TIMEOUT).await;

        drop(sender);
        writer.await.unwrap();
        let mut replies = Vec::new();
        let mut reply_reader = MessageReader::new(from_remote);
        while let Some(line) = reply_reader.next_line().await.unwrap() {
            replies.push(decode_line(&line).unwrap());
        }
        (result, replies)
    }

    #[tokio::test]
    async fn valid_handshake_registers_and_responds() {
        // Scenario A: capacity 2, currently 0 peers.
        let registry = PeerRegistry::new(2);
        let request = encode_line(&Message::HandshakeRequest(HandshakeRequest {
            host_port: PeerAddress::new("peer-b", 8112),
        }))
        .unwrap();

        let (result, replies) = run_accept(&request, &registry).await;
        assert_eq!(result.unwrap(), PeerAddress::new("peer-b", 8112));
        assert_eq!(replies.len(), 1);
        match &replies[0] {
            Message::HandshakeResponse(resp) => assert_eq!(resp.host_port, local()),
            other => panic!("expected HANDSHAKE_RESPONSE, got {}", other.command()),
        }
        assert_eq!(registry.snapshot(), vec![PeerAddress::new("peer-b", 8112)]);
    }

    #[tokio::test]
    async fn full_registry_refuses_with_peer_list() {
        // Scenario B: capacity 2, already 2/2.
        let registry = PeerRegistry::new(2);
        let (k1, _s1) = {
            let (c, s) = tokio::io::duplex(64);
            (spawn_writer(c).0, s)
        };
        let (k2, _s2) = {
            let (c, s) = tokio::io::duplex(64);
            (spawn_writer(c).0, s)
        };
        registry.try_admit(PeerAddress::new("p1", 1), &k1);
        registry.try_admit(PeerAddress::new("p2", 2), &k2);

        let request = encode_line(&Message::HandshakeRequest(HandshakeRequest {
            host_port: PeerAddress::new("peer-c", 8113),
        }))
        .unwrap();
        let (result, replies) = run_accept(&request, &registry).await;

        assert!(matches!(result, Err(HandshakeError::RegistryFull)));
        assert_eq!(replies.len(), 1);
        match &replies[0] {
            Message::ConnectionRefused(refused) => {
                assert_eq!(refused.peers.len(), 2);
                assert!(refused.peers.contains(&PeerAddress::new("p1", 1)));
            }
            other => panic!("expected CONNECTION_REFUSED, got {}", other.command()),
        }
        assert_eq!(registry.len(), 2);
        assert!(!registry.snapshot().contains(&PeerAddress::new("peer-c", 8113)));
    }

    #[tokio::test]
    async fn missing_command_is_a_violation() {
        // Scenario E.
        let registry = PeerRegistry::new(2);
        let (result, replies) = run_accept(r#"{"hostPort":{"host":"x","port":1}}"#, &registry).await;
        assert!(matches!(result, Err(HandshakeError::Violation { .. })));
        match &replies[0] {
            Message::InvalidProtocol(p) => {
                assert_eq!(p.message, "message must contain a command field as string")
            }
            other => panic!("expected INVALID_PROTOCOL, got {}", other.command()),
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn missing_host_port_is_a_violation() {
        let registry = PeerRegistry::new(2);
        let (result, replies) = run_accept(r#"{"command":"HANDSHAKE_REQUEST"}"#, &registry).await;
        assert!(matches!(result, Err(HandshakeError::Violation { .. })));
        match &replies[0] {
            Message::InvalidProtocol(p) => {
                assert_eq!(p.message, "message must contain host and port for handshake")
            }
            other => panic!("expected INVALID_PROTOCOL, got {}", other.command()),
        }
    }

    #[tokio::test]
    async fn non_handshake_command_is_a_violation() {
        let registry = PeerRegistry::new(2);
        let line = r#"{"command":"FILE_CREATE_REQUEST","hostPort":{"host":"x","port":1}}"#;
        let (result, replies) = run_accept(line, &registry).await;
        assert!(matches!(result, Err(HandshakeError::Violation { .. })));
        match &replies[0] {
            Message::InvalidProtocol(p) => assert_eq!(p.message, "handshake is required"),
            other => panic!("expected INVALID_PROTOCOL, got {}", other.command()),
        }
    }

    #[tokio::test]
    async fn malformed_json_counts_as_missing_command() {
        let registry = PeerRegistry::new(2);
        let (result, replies) = run_accept("{garbage", &registry).await;
        assert!(matches!(result, Err(HandshakeError::Violation { .. })));
        match &replies[0] {
            Message::InvalidProtocol(p) => {
                assert_eq!(p.message, "message must contain a command field as string")
            }
            other => panic!("expected INVALID_PROTOCOL, got {}", other.command()),
        }
    }

    #[tokio::test]
    async fn handshake_times_out_without_a_first_message() {
        let registry = PeerRegistry::new(2);
        let (to_acceptor, _from_remote) = tokio::io::duplex(64);
        let (reply_stream, _remote_write) = tokio::io::duplex(64);
        let (sender, _writer) = spawn_writer(to_acceptor);
        let mut reader = MessageReader::new(reply_stream);

        let result = accept(
            &mut reader,
            &sender,
            &registry,
            &local(),
            Duration::from_millis(20),
        )
        .await;
        assert!(matches!(result, Err(HandshakeError::Timeout)));
    }

    #[tokio::test]
    async fn initiate_handles_response_and_refusal() {
        let registry = PeerRegistry::new(2);

        // Accepted outcome.
        let (to_remote, from_us) = tokio::io::duplex(8192);
        let (reply_stream, mut remote_write) = tokio::io::duplex(8192);
        let response = encode_line(&Message::HandshakeResponse(HandshakeResponse {
            host_port: PeerAddress::new("remote", 9000),
        }))
        .unwrap();
        remote_write
            .write_all(format!("{response}\n").as_bytes())
            .await
            .unwrap();

        let (sender, writer) = spawn_writer(to_remote);
        let mut reader = MessageReader::new(reply_stream);
        let peer = initiate(&mut reader, &sender, &registry, &local(), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(peer, PeerAddress::new("remote", 9000));
        assert_eq!(registry.len(), 1);

        drop(sender);
        writer.await.unwrap();
        let mut sent = MessageReader::new(from_us);
        let first = decode_line(&sent.next_line().await.unwrap().unwrap()).unwrap();
        match first {
            Message::HandshakeRequest(req) => assert_eq!(req.host_port, local()),
            other => panic!("expected HANDSHAKE_REQUEST, got {}", other.command()),
        }

        // Refused outcome surfaces the bootstrap list.
        let registry = PeerRegistry::new(2);
        let (to_remote, _from_us) = tokio::io::duplex(8192);
        let (reply_stream, mut remote_write) = tokio::io::duplex(8192);
        let refusal = encode_line(&Message::ConnectionRefused(ConnectionRefused {
            message: "connection limit reached".into(),
            peers: vec![PeerAddress::new("other", 9001)],
        }))
        .unwrap();
        remote_write
            .write_all(format!("{refusal}\n").as_bytes())
            .await
            .unwrap();

        let (sender, _writer) = spawn_writer(to_remote);
        let mut reader = MessageReader::new(reply_stream);
        match initiate(&mut reader, &sender, &registry, &local(), TIMEOUT).await {
            Err(HandshakeError::RemoteRefused { peers }) => {
                assert_eq!(peers, vec![PeerAddress::new("other", 9001)]);
            }
            other => panic!("expected RemoteRefused, got {other:?}"),
        }
        assert!(registry.is_empty());
    }
}
