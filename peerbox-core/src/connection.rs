//! Per-connection send and receive halves.
//!
//! Exactly one writer task owns the socket's write half and drains a bounded
//! queue; every handler and transfer session enqueues through a cloned
//! [`MessageSender`]. This is the serialized send path that keeps concurrent
//! tasks from interleaving partial lines on the wire.

use peerbox_types::{encode_line, Message, MAX_LINE_BYTES};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::CoreError;

/// Depth of the per-connection send queue. Senders suspend when the peer
/// falls this many messages behind.
pub const SEND_QUEUE_DEPTH: usize = 64;

/// Handshake progress of a connection. Transitions are monotonically
/// forward; a connection never re-enters `Init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Accepted or dialed; no handshake exchange yet.
    Init,
    /// Handshake succeeded; the connection is admitted.
    Handshaken,
    /// Admission was refused.
    Refused,
    /// The stream is closed.
    Closed,
}

impl HandshakeState {
    /// Advance to `next` if the transition moves forward. Returns whether
    /// the transition was taken.
    pub fn advance(&mut self, next: HandshakeState) -> bool {
        let allowed = match (*self, next) {
            (HandshakeState::Init, HandshakeState::Handshaken)
            | (HandshakeState::Init, HandshakeState::Refused)
            | (HandshakeState::Init, HandshakeState::Closed)
            | (HandshakeState::Handshaken, HandshakeState::Closed)
            | (HandshakeState::Refused, HandshakeState::Closed) => true,
            _ => false,
        };
        if allowed {
            *self = next;
        }
        allowed
    }
}

/// Cloneable enqueue handle for one connection's writer task.
#[derive(Debug, Clone)]
pub struct MessageSender {
    tx: mpsc::Sender<Message>,
}

impl MessageSender {
    /// Enqueue a message for the writer task.
    ///
    /// Suspends while the queue is full. Fails only when the writer task has
    /// exited, i.e. the connection is gone.
    pub async fn send(&self, message: Message) -> Result<(), CoreError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| CoreError::ConnectionClosed)
    }

    /// Downgrade to a weak handle that does not keep the queue alive.
    pub fn downgrade(&self) -> WeakMessageSender {
        WeakMessageSender {
            tx: self.tx.downgrade(),
        }
    }
}

/// Weak counterpart of [`MessageSender`], held by the peer registry.
#[derive(Debug, Clone)]
pub struct WeakMessageSender {
    tx: mpsc::WeakSender<Message>,
}

impl WeakMessageSender {
    /// Upgrade back to a usable sender, if the connection still exists.
    pub fn upgrade(&self) -> Option<MessageSender> {
        self.tx.upgrade().map(|tx| MessageSender { tx })
    }
}

/// Spawn the writer task for a connection's write half.
///
/// The task encodes each queued message as one line and exits when every
/// sender is dropped or the first write fails.
pub fn spawn_writer<W>(mut write: W) -> (MessageSender, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Message>(SEND_QUEUE_DEPTH);
    let handle = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let line = match encode_line(&message) {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!("dropping unencodable {}: {}", message.command(), e);
                    continue;
                }
            };
            tracing::debug!("sending {}", message.command());
            if let Err(e) = write.write_all(line.as_bytes()).await {
                tracing::debug!("write failed, closing writer: {}", e);
                break;
            }
            if let Err(e) = write.write_all(b"\n").await {
                tracing::debug!("write failed, closing writer: {}", e);
                break;
            }
        }
        // Closing the receiver makes any remaining send() fail fast.
        rx.close();
    });
    (MessageSender { tx }, handle)
}

/// Line-oriented reader over a connection's read half.
///
/// Generic over the reader so handshake and dispatcher logic can be tested
/// against in-memory duplex streams. The line-length cap is enforced while
/// reading: a peer streaming an endless unterminated line errors out as soon
/// as the accumulated prefix passes [`MAX_LINE_BYTES`], it never grows the
/// buffer past the cap.
pub struct MessageReader<R> {
    reader: BufReader<R>,
    partial: Vec<u8>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    /// Wrap a read half.
    pub fn new(read: R) -> Self {
        Self {
            reader: BufReader::new(read),
            partial: Vec::new(),
        }
    }

    /// Read the next line, without its terminator. Returns `None` at EOF.
    ///
    /// Cancel-safe: losing the race in a `select!` does not lose bytes; a
    /// partially read line stays accumulated in the reader.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                // EOF: an unterminated tail still counts as a line.
                if self.partial.is_empty() {
                    return Ok(None);
                }
                return Self::finish_line(std::mem::take(&mut self.partial)).map(Some);
            }
            match buf.iter().position(|&b| b == b'\n') {
                Some(newline) => {
                    self.partial.extend_from_slice(&buf[..newline]);
                    self.reader.consume(newline + 1);
                    if self.partial.len() > MAX_LINE_BYTES {
                        self.partial.clear();
                        return Err(line_too_long());
                    }
                    return Self::finish_line(std::mem::take(&mut self.partial)).map(Some);
                }
                None => {
                    let read = buf.len();
                    self.partial.extend_from_slice(buf);
                    self.reader.consume(read);
                    if self.partial.len() > MAX_LINE_BYTES {
                        self.partial.clear();
                        return Err(line_too_long());
                    }
                }
            }
        }
    }

    fn finish_line(mut bytes: Vec<u8>) -> std::io::Result<String> {
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        String::from_utf8(bytes).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "line is not valid UTF-8")
        })
    }
}

fn line_too_long() -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("line exceeds {MAX_LINE_BYTES} bytes"),
    )
}
