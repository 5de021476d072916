//! Command dispatcher: one read loop per admitted connection.
//!
//! Messages are processed in arrival order; every request earns exactly one
//! response, enqueued on the connection's serialized sender. Transfer
//! sessions are message-driven state held beside the loop, so a slow
//! transfer never blocks unrelated commands on the same connection.

use std::sync::Arc;
use std::time::Duration;

use peerbox_types::{
    decode_line, DecodeError, DirectoryCreateRequest, DirectoryCreateResponse,
    DirectoryDeleteRequest, DirectoryDeleteResponse, FileBytesResponse, FileCreateRequest,
    FileCreateResponse, FileDeleteRequest, FileDeleteResponse, FileModifyRequest,
    FileModifyResponse, Message, PeerAddress,
};
use tokio::io::AsyncRead;

use crate::connection::{MessageReader, MessageSender};
use crate::error::CoreError;
use crate::fs::SyncFileSystem;
use crate::transfer::{self, ReceiveSession, SessionStep, TransferTable};

/// Tuning knobs for a connection's dispatcher.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Maximum byte-range length per `FILE_BYTES_REQUEST`.
    pub block_size: u64,
    /// Retries of one range after `status: false` before the session fails.
    pub max_retries: u32,
    /// Receive sessions idle past this window are failed and dropped.
    pub transfer_idle_timeout: Duration,
    /// Protocol violations tolerated before the connection is terminated.
    pub max_violations: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            block_size: 8192,
            max_retries: 5,
            transfer_idle_timeout: Duration::from_secs(30),
            max_violations: 5,
        }
    }
}

/// Routes decoded messages for one admitted connection.
pub struct Dispatcher<F: SyncFileSystem + ?Sized> {
    peer: PeerAddress,
    sender: MessageSender,
    fs: Arc<F>,
    config: ProtocolConfig,
    transfers: TransferTable,
    violations: u32,
}

impl<F: SyncFileSystem + ?Sized> Dispatcher<F> {
    /// Create a dispatcher for a connection that completed its handshake.
    pub fn new(
        peer: PeerAddress,
        sender: MessageSender,
        fs: Arc<F>,
        config: ProtocolConfig,
    ) -> Self {
        Self {
            peer,
            sender,
            fs,
            config,
            transfers: TransferTable::new(),
            violations: 0,
        }
    }

    /// Run until the stream closes or the peer exhausts its violation
    /// budget. In-flight sessions are abandoned either way.
    pub async fn run<R: AsyncRead + Unpin>(
        mut self,
        reader: &mut MessageReader<R>,
    ) -> Result<(), CoreError> {
        let mut sweep = tokio::time::interval(self.config.transfer_idle_timeout);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                line = reader.next_line() => {
                    match line? {
                        None => {
                            tracing::info!(peer = %self.peer, "connection closed by peer");
                            break;
                        }
                        Some(line) => self.handle_line(&line).await?,
                    }
                }
                _ = sweep.tick() => self.expire_stale(),
            }
        }
        Ok(())
    }

    async fn handle_line(&mut self, line: &str) -> Result<(), CoreError> {
        match decode_line(line) {
            Ok(message) => self.handle_message(message).await,
            Err(DecodeError::UnknownCommand { command }) => {
                // Lenient by design: unrecognized verbs are dropped, not
                // answered.
                tracing::warn!(peer = %self.peer, command, "ignoring unknown command");
                Ok(())
            }
            Err(err) => self.violation(err.to_string()).await,
        }
    }

    async fn violation(&mut self, reason: String) -> Result<(), CoreError> {
        self.violations += 1;
        tracing::warn!(
            peer = %self.peer,
            count = self.violations,
            "protocol violation: {}",
            reason
        );
        self.sender.send(Message::invalid_protocol(reason)).await?;
        if self.violations > self.config.max_violations {
            return Err(CoreError::TooManyViolations {
                count: self.violations,
            });
        }
        Ok(())
    }

    async fn handle_message(&mut self, message: Message) -> Result<(), CoreError> {
        tracing::debug!(peer = %self.peer, command = message.command(), "dispatching");
        match message {
            Message::HandshakeRequest(_) => {
                // Never fatal after admission.
                self.sender
                    .send(Message::invalid_protocol(
                        "handshake request after successful handshake",
                    ))
                    .await
            }
            Message::HandshakeResponse(_) | Message::ConnectionRefused(_) => {
                tracing::warn!(
                    peer = %self.peer,
                    command = message.command(),
                    "handshake reply outside handshake phase, ignoring"
                );
                Ok(())
            }
            Message::InvalidProtocol(invalid) => {
                tracing::warn!(peer = %self.peer, "peer reports: {}", invalid.message);
                Ok(())
            }
            Message::FileCreateRequest(request) => self.handle_file_create(request).await,
            Message::FileModifyRequest(request) => self.handle_file_modify(request).await,
            Message::FileDeleteRequest(request) => self.handle_file_delete(request).await,
            Message::DirectoryCreateRequest(request) => {
                self.handle_directory_create(request).await
            }
            Message::DirectoryDeleteRequest(request) => {
                self.handle_directory_delete(request).await
            }
            Message::FileBytesRequest(request) => {
                let response = transfer::serve_request(&request, &*self.fs).await;
                self.sender.send(Message::FileBytesResponse(response)).await
            }
            Message::FileBytesResponse(response) => self.handle_bytes_response(response).await,
            Message::FileCreateResponse(ack) => {
                self.log_ack("FILE_CREATE_RESPONSE", ack.status, &ack.message);
                Ok(())
            }
            Message::FileModifyResponse(ack) => {
                self.log_ack("FILE_MODIFY_RESPONSE", ack.status, &ack.message);
                Ok(())
            }
            Message::FileDeleteResponse(ack) => {
                self.log_ack("FILE_DELETE_RESPONSE", ack.status, &ack.message);
                Ok(())
            }
            Message::DirectoryCreateResponse(ack) => {
                self.log_ack("DIRECTORY_CREATE_RESPONSE", ack.status, &ack.message);
                Ok(())
            }
            Message::DirectoryDeleteResponse(ack) => {
                self.log_ack("DIRECTORY_DELETE_RESPONSE", ack.status, &ack.message);
                Ok(())
            }
        }
    }

    fn log_ack(&self, command: &str, status: bool, message: &str) {
        let outcome = if status { "success" } else { "fail" };
        tracing::info!(peer = %self.peer, "{} {}: {}", command, outcome, message);
    }

    /// Open a receive session after a locally accepted create/modify,
    /// unless the shortcut already satisfied it or the file is empty.
    async fn begin_receive(
        &mut self,
        request_descriptor: peerbox_types::FileDescriptor,
        path: String,
        shortcut: bool,
    ) -> Result<(), CoreError> {
        if shortcut || request_descriptor.file_size == 0 {
            return Ok(());
        }
        let session = ReceiveSession::new(request_descriptor, path, self.config.block_size);
        let first = session.request();
        self.transfers.begin(session);
        self.sender.send(first).await
    }

    async fn handle_file_create(&mut self, request: FileCreateRequest) -> Result<(), CoreError> {
        tracing::info!(peer = %self.peer, path = %request.path_name, "file create requested");
        let outcome = self
            .fs
            .create_file(&request.file_descriptor, &request.path_name)
            .await;
        let (status, shortcut, message) = match outcome {
            Ok(applied) if applied.shortcut => {
                (true, true, "created from identical local content".to_owned())
            }
            Ok(_) => (true, false, "file loader ready".to_owned()),
            Err(e) => (false, false, e.to_string()),
        };
        self.sender
            .send(Message::FileCreateResponse(FileCreateResponse {
                file_descriptor: request.file_descriptor.clone(),
                path_name: request.path_name.clone(),
                status,
                message,
            }))
            .await?;
        if status {
            self.begin_receive(request.file_descriptor, request.path_name, shortcut)
                .await?;
        }
        Ok(())
    }

    async fn handle_file_modify(&mut self, request: FileModifyRequest) -> Result<(), CoreError> {
        tracing::info!(peer = %self.peer, path = %request.path_name, "file modify requested");
        let outcome = self
            .fs
            .modify_file(&request.file_descriptor, &request.path_name)
            .await;
        let (status, shortcut, message) = match outcome {
            Ok(applied) if applied.shortcut => {
                (true, true, "content already up to date".to_owned())
            }
            Ok(_) => (true, false, "file loader ready".to_owned()),
            Err(e) => (false, false, e.to_string()),
        };
        self.sender
            .send(Message::FileModifyResponse(FileModifyResponse {
                file_descriptor: request.file_descriptor.clone(),
                path_name: request.path_name.clone(),
                status,
                message,
            }))
            .await?;
        if status {
            self.begin_receive(request.file_descriptor, request.path_name, shortcut)
                .await?;
        }
        Ok(())
    }

    async fn handle_file_delete(&mut self, request: FileDeleteRequest) -> Result<(), CoreError> {
        tracing::info!(peer = %self.peer, path = %request.path_name, "file delete requested");
        let (status, message) = match self
            .fs
            .delete_file(&request.file_descriptor, &request.path_name)
            .await
        {
            Ok(()) => (true, "file deleted".to_owned()),
            Err(e) => (false, e.to_string()),
        };
        self.sender
            .send(Message::FileDeleteResponse(FileDeleteResponse {
                file_descriptor: request.file_descriptor,
                path_name: request.path_name,
                status,
                message,
            }))
            .await
    }

    async fn handle_directory_create(
        &mut self,
        request: DirectoryCreateRequest,
    ) -> Result<(), CoreError> {
        tracing::info!(peer = %self.peer, path = %request.path_name, "directory create requested");
        let (status, message) = match self.fs.create_directory(&request.path_name).await {
            Ok(()) => (true, "directory created".to_owned()),
            Err(e) => (false, e.to_string()),
        };
        self.sender
            .send(Message::DirectoryCreateResponse(DirectoryCreateResponse {
                path_name: request.path_name,
                status,
                message,
            }))
            .await
    }

    async fn handle_directory_delete(
        &mut self,
        request: DirectoryDeleteRequest,
    ) -> Result<(), CoreError> {
        tracing::info!(peer = %self.peer, path = %request.path_name, "directory delete requested");
        let (status, message) = match self.fs.delete_directory(&request.path_name).await {
            Ok(()) => (true, "directory deleted".to_owned()),
            Err(e) => (false, e.to_string()),
        };
        self.sender
            .send(Message::DirectoryDeleteResponse(DirectoryDeleteResponse {
                path_name: request.path_name,
                status,
                message,
            }))
            .await
    }

    async fn handle_bytes_response(
        &mut self,
        response: FileBytesResponse,
    ) -> Result<(), CoreError> {
        let path = response.path_name.clone();
        let Some(session) = self.transfers.session_mut(&path) else {
            tracing::warn!(peer = %self.peer, path = %path, "byte response with no active session");
            return Ok(());
        };
        match session
            .on_response(&response, &*self.fs, self.config.max_retries)
            .await
        {
            SessionStep::Send(message) => self.sender.send(message).await,
            SessionStep::Complete => {
                tracing::info!(peer = %self.peer, path = %path, "file fully received");
                self.transfers.remove(&path);
                Ok(())
            }
            SessionStep::Failed(reason) => {
                tracing::warn!(peer = %self.peer, path = %path, "transfer failed: {}", reason);
                self.transfers.remove(&path);
                Ok(())
            }
        }
    }

    fn expire_stale(&mut self) {
        for path in self
            .transfers
            .expire_idle(self.config.transfer_idle_timeout)
        {
            tracing::warn!(
                peer = %self.peer,
                path = %path,
                "transfer abandoned: no byte response within idle window"
            );
        }
    }
}
