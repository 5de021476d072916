//! Chunked file-transfer sessions.
//!
//! One logical transfer has two roles: the requester wants bytes and drives
//! `FILE_BYTES_REQUEST`; the responder owns the bytes and answers with
//! `FILE_BYTES_RESPONSE`. The requester side is the stateful one, modeled by
//! [`ReceiveSession`]; the responder serves each request from scratch via
//! [`serve_request`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use peerbox_types::{FileBytesRequest, FileBytesResponse, FileDescriptor, Message};

use crate::fs::SyncFileSystem;

/// Length of the next chunk: a full block, or the tail of the file.
pub fn chunk_len(position: u64, file_size: u64, block_size: u64) -> u64 {
    block_size.min(file_size.saturating_sub(position))
}

/// Lifecycle of a receive session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// First request sent, no bytes applied yet.
    Requested,
    /// At least one chunk applied.
    Active,
    /// `position == file_size`; the session is done.
    Complete,
    /// Terminated by an irrecoverable error.
    Failed,
}

/// What the dispatcher must do after a session consumed a response.
#[derive(Debug)]
pub enum SessionStep {
    /// Enqueue this request (the next chunk, or a retry of the same range).
    Send(Message),
    /// The file is fully received.
    Complete,
    /// The session is dead; the connection stays up.
    Failed(String),
}

/// Requester-side state for one in-flight file on one connection.
///
/// Invariant: `position + length <= file_size` for every request this
/// session issues; completion is exactly `position == file_size`.
#[derive(Debug)]
pub struct ReceiveSession {
    descriptor: FileDescriptor,
    path: String,
    position: u64,
    block_size: u64,
    attempts: u32,
    status: SessionStatus,
    last_activity: Instant,
}

impl ReceiveSession {
    /// Start a session at position zero.
    pub fn new(descriptor: FileDescriptor, path: impl Into<String>, block_size: u64) -> Self {
        Self {
            descriptor,
            path: path.into(),
            position: 0,
            block_size,
            attempts: 0,
            status: SessionStatus::Requested,
            last_activity: Instant::now(),
        }
    }

    /// The request for the chunk at the current position.
    pub fn request(&self) -> Message {
        Message::FileBytesRequest(FileBytesRequest {
            file_descriptor: self.descriptor.clone(),
            path_name: self.path.clone(),
            position: self.position,
            length: chunk_len(self.position, self.descriptor.file_size, self.block_size),
        })
    }

    /// Path this session is receiving.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Current lifecycle state.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Time since the last response consumed by this session.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    fn fail(&mut self, reason: String) -> SessionStep {
        self.status = SessionStatus::Failed;
        SessionStep::Failed(reason)
    }

    /// Consume one `FILE_BYTES_RESPONSE` and decide the next step.
    ///
    /// A `status: false` response retries the same range until `max_retries`
    /// is exhausted. Any response outside the expected sequence fails the
    /// session without closing the connection.
    pub async fn on_response<F>(
        &mut self,
        response: &FileBytesResponse,
        fs: &F,
        max_retries: u32,
    ) -> SessionStep
    where
        F: SyncFileSystem + ?Sized,
    {
        self.last_activity = Instant::now();

        if !response.status {
            self.attempts += 1;
            if self.attempts > max_retries {
                return self.fail(format!(
                    "range {}+{} of {} still unreadable after {} attempts: {}",
                    self.position,
                    chunk_len(self.position, self.descriptor.file_size, self.block_size),
                    self.path,
                    self.attempts,
                    response.message
                ));
            }
            tracing::debug!(
                path = %self.path,
                position = self.position,
                attempt = self.attempts,
                "peer could not read range, retrying"
            );
            return SessionStep::Send(self.request());
        }

        if response.position != self.position {
            return self.fail(format!(
                "out-of-sequence response: expected position {}, got {}",
                self.position, response.position
            ));
        }
        let file_size = self.descriptor.file_size;
        if response.position + response.length > file_size {
            return self.fail(format!(
                "response range {}+{} exceeds file size {}",
                response.position, response.length, file_size
            ));
        }
        let content = match &response.content {
            Some(content) => content,
            None => return self.fail("successful response carried no content".into()),
        };
        let bytes = match BASE64.decode(content) {
            Ok(bytes) => bytes,
            Err(e) => return self.fail(format!("undecodable content: {e}")),
        };
        if bytes.len() as u64 != response.length {
            return self.fail(format!(
                "content length {} disagrees with declared length {}",
                bytes.len(),
                response.length
            ));
        }

        if let Err(e) = fs.write_bytes(&self.path, self.position, &bytes).await {
            return self.fail(format!("local write failed: {e}"));
        }

        self.attempts = 0;
        self.position += response.length;
        if self.position == file_size {
            self.status = SessionStatus::Complete;
            SessionStep::Complete
        } else {
            self.status = SessionStatus::Active;
            SessionStep::Send(self.request())
        }
    }
}

/// Serve one byte-range request against the local filesystem.
///
/// Failures become `status: false` responses; the requester drives any
/// retry. The connection is never at risk here.
pub async fn serve_request<F>(request: &FileBytesRequest, fs: &F) -> FileBytesResponse
where
    F: SyncFileSystem + ?Sized,
{
    let file_size = request.file_descriptor.file_size;
    let base = FileBytesResponse {
        file_descriptor: request.file_descriptor.clone(),
        path_name: request.path_name.clone(),
        position: request.position,
        length: request.length,
        content: None,
        status: false,
        message: String::new(),
    };

    if request.position.saturating_add(request.length) > file_size {
        return FileBytesResponse {
            message: format!(
                "requested range {}+{} exceeds file size {}",
                request.position, request.length, file_size
            ),
            ..base
        };
    }

    match fs
        .read_bytes(&request.path_name, request.position, request.length)
        .await
    {
        Ok(bytes) => FileBytesResponse {
            content: Some(BASE64.encode(&bytes)),
            status: true,
            message: "successful read".into(),
            ..base
        },
        Err(e) => {
            tracing::debug!(path = %request.path_name, "byte read failed: {}", e);
            FileBytesResponse {
                message: format!("unsuccessful read: {e}"),
                ..base
            }
        }
    }
}

/// Receive sessions in flight on one connection, keyed by path.
#[derive(Default)]
pub struct TransferTable {
    sessions: HashMap<String, ReceiveSession>,
}

impl TransferTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session, replacing any stale one for the same path.
    pub fn begin(&mut self, session: ReceiveSession) {
        if let Some(old) = self.sessions.insert(session.path.clone(), session) {
            tracing::warn!(path = %old.path, "replacing stalled transfer session");
        }
    }

    /// Look up the session a response belongs to.
    pub fn session_mut(&mut self, path: &str) -> Option<&mut ReceiveSession> {
        self.sessions.get_mut(path)
    }

    /// Drop a finished or failed session.
    pub fn remove(&mut self, path: &str) {
        self.sessions.remove(path);
    }

    /// Fail and drop sessions idle past `timeout`; returns their paths.
    pub fn expire_idle(&mut self, timeout: Duration) -> Vec<String> {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.idle_for() > timeout)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &expired {
            self.sessions.remove(path);
        }
        expired
    }

    /// Number of in-flight sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is in flight.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{fingerprint, MemoryFileSystem};

    fn descriptor(bytes: &[u8]) -> FileDescriptor {
        FileDescriptor::new(fingerprint(bytes), 0, bytes.len() as u64)
    }

    fn ok_response(request: &Message, bytes: &[u8]) -> FileBytesResponse {
        let Message::FileBytesRequest(req) = request else {
            panic!("expected FILE_BYTES_REQUEST, got {}", request.command());
        };
        FileBytesResponse {
            file_descriptor: req.file_descriptor.clone(),
            path_name: req.path_name.clone(),
            position: req.position,
            length: req.length,
            content: Some(BASE64.encode(
                &bytes[req.position as usize..(req.position + req.length) as usize],
            )),
            status: true,
            message: "successful read".into(),
        }
    }

    #[test]
    fn chunk_len_covers_full_blocks_and_tail() {
        assert_eq!(chunk_len(0, 20_000, 8192), 8192);
        assert_eq!(chunk_len(8192, 20_000, 8192), 8192);
        assert_eq!(chunk_len(16_384, 20_000, 8192), 3616);
        assert_eq!(chunk_len(0, 100, 8192), 100);
        assert_eq!(chunk_len(0, 0, 8192), 0);
    }

    #[test]
    fn advancing_by_chunk_len_terminates_in_ceil_rounds() {
        for (file_size, block_size) in
            [(20_000u64, 8192u64), (8192, 8192), (1, 8192), (8193, 8192), (0, 1), (65_536, 4096)]
        {
            let mut position = 0;
            let mut rounds = 0u64;
            while position < file_size {
                let length = chunk_len(position, file_size, block_size);
                assert!(position + length <= file_size);
                position += length;
                rounds += 1;
            }
            assert_eq!(position, file_size);
            assert_eq!(rounds, file_size.div_ceil(block_size));
        }
    }

    #[tokio::test]
    async fn session_walks_scenario_c_positions() {
        // 20000 bytes at block 8192: requests at 0, 8192, 16384 with
        // lengths 8192, 8192, 3616.
        let content: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let desc = descriptor(&content);
        let fs = MemoryFileSystem::new();
        fs.create_file(&desc, "foo.txt").await.unwrap();

        let mut session = ReceiveSession::new(desc, "foo.txt", 8192);
        let mut request = session.request();
        let mut observed = Vec::new();
        loop {
            let Message::FileBytesRequest(req) = &request else {
                panic!()
            };
            observed.push((req.position, req.length));
            let response = ok_response(&request, &content);
            match session.on_response(&response, &fs, 3).await {
                SessionStep::Send(next) => request = next,
                SessionStep::Complete => break,
                SessionStep::Failed(reason) => panic!("failed: {reason}"),
            }
        }
        assert_eq!(observed, vec![(0, 8192), (8192, 8192), (16_384, 3616)]);
        assert_eq!(session.status(), SessionStatus::Complete);
        assert_eq!(fs.contents("foo.txt").unwrap(), content);
    }

    #[tokio::test]
    async fn failed_read_retries_same_range() {
        let content = vec![7u8; 100];
        let desc = descriptor(&content);
        let fs = MemoryFileSystem::new();
        fs.create_file(&desc, "a.bin").await.unwrap();

        let mut session = ReceiveSession::new(desc.clone(), "a.bin", 64);
        let first = session.request();
        let failure = FileBytesResponse {
            file_descriptor: desc,
            path_name: "a.bin".into(),
            position: 0,
            length: 64,
            content: None,
            status: false,
            message: "unsuccessful read".into(),
        };
        match session.on_response(&failure, &fs, 3).await {
            SessionStep::Send(retry) => assert_eq!(retry, first),
            other => panic!("expected retry, got {other:?}"),
        }
        assert_eq!(session.position(), 0);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let content = vec![7u8; 100];
        let desc = descriptor(&content);
        let fs = MemoryFileSystem::new();
        fs.create_file(&desc, "a.bin").await.unwrap();

        let mut session = ReceiveSession::new(desc.clone(), "a.bin", 64);
        let failure = FileBytesResponse {
            file_descriptor: desc,
            path_name: "a.bin".into(),
            position: 0,
            length: 64,
            content: None,
            status: false,
            message: "disk on fire".into(),
        };
        for _ in 0..2 {
            assert!(matches!(
                session.on_response(&failure, &fs, 2).await,
                SessionStep::Send(_)
            ));
        }
        match session.on_response(&failure, &fs, 2).await {
            SessionStep::Failed(reason) => assert!(reason.contains("disk on fire")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(session.status(), SessionStatus::Failed);
    }

    #[tokio::test]
    async fn out_of_sequence_position_fails_session() {
        let content = vec![1u8; 200];
        let desc = descriptor(&content);
        let fs = MemoryFileSystem::new();
        fs.create_file(&desc, "b.bin").await.unwrap();

        let mut session = ReceiveSession::new(desc.clone(), "b.bin", 64);
        let response = FileBytesResponse {
            file_descriptor: desc,
            path_name: "b.bin".into(),
            position: 128, // expected 0
            length: 64,
            content: Some(BASE64.encode(vec![1u8; 64])),
            status: true,
            message: "successful read".into(),
        };
        assert!(matches!(
            session.on_response(&response, &fs, 3).await,
            SessionStep::Failed(_)
        ));
    }

    #[tokio::test]
    async fn oversized_range_fails_session() {
        let content = vec![1u8; 100];
        let desc = descriptor(&content);
        let fs = MemoryFileSystem::new();
        fs.create_file(&desc, "c.bin").await.unwrap();

        let mut session = ReceiveSession::new(desc.clone(), "c.bin", 64);
        let response = FileBytesResponse {
            file_descriptor: desc,
            path_name: "c.bin".into(),
            position: 0,
            length: 128, // > file_size
            content: Some(BASE64.encode(vec![1u8; 128])),
            status: true,
            message: "successful read".into(),
        };
        assert!(matches!(
            session.on_response(&response, &fs, 3).await,
            SessionStep::Failed(_)
        ));
    }

    #[tokio::test]
    async fn content_length_mismatch_fails_session() {
        let content = vec![1u8; 100];
        let desc = descriptor(&content);
        let fs = MemoryFileSystem::new();
        fs.create_file(&desc, "d.bin").await.unwrap();

        let mut session = ReceiveSession::new(desc.clone(), "d.bin", 64);
        let response = FileBytesResponse {
            file_descriptor: desc,
            path_name: "d.bin".into(),
            position: 0,
            length: 64,
            content: Some(BASE64.encode(vec![1u8; 10])), // short
            status: true,
            message: "successful read".into(),
        };
        assert!(matches!(
            session.on_response(&response, &fs, 3).await,
            SessionStep::Failed(_)
        ));
    }

    #[tokio::test]
    async fn serve_request_returns_range_or_failure() {
        let fs = MemoryFileSystem::new();
        let desc = fs.insert_file("e.bin", b"0123456789");

        let ok = serve_request(
            &FileBytesRequest {
                file_descriptor: desc.clone(),
                path_name: "e.bin".into(),
                position: 2,
                length: 4,
            },
            &fs,
        )
        .await;
        assert!(ok.status);
        assert_eq!(BASE64.decode(ok.content.unwrap()).unwrap(), b"2345");

        let missing = serve_request(
            &FileBytesRequest {
                file_descriptor: desc.clone(),
                path_name: "no-such-file".into(),
                position: 0,
                length: 4,
            },
            &fs,
        )
        .await;
        assert!(!missing.status);
        assert!(missing.content.is_none());

        let oversized = serve_request(
            &FileBytesRequest {
                file_descriptor: desc,
                path_name: "e.bin".into(),
                position: 8,
                length: 8,
            },
            &fs,
        )
        .await;
        assert!(!oversized.status);
        assert!(oversized.message.contains("exceeds file size"));
    }

    #[test]
    fn idle_sessions_expire() {
        let desc = FileDescriptor::new("fp", 0, 100);
        let mut table = TransferTable::new();
        table.begin(ReceiveSession::new(desc, "slow.bin", 64));
        assert!(table.expire_idle(Duration::from_secs(60)).is_empty());
        std::thread::sleep(Duration::from_millis(2));
        let expired = table.expire_idle(Duration::ZERO);
        assert_eq!(expired, vec!["slow.bin".to_string()]);
        assert!(table.is_empty());
    }
}
