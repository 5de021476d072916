//! Turns local file-system events into peer requests and fans them out.

use peerbox_types::{
    DirectoryCreateRequest, DirectoryDeleteRequest, FileCreateRequest, FileDeleteRequest,
    FileDescriptor, FileModifyRequest, Message,
};

use crate::registry::PeerRegistry;

/// A change observed under the local sync root.
///
/// Paths are relative to the sync root with forward-slash separators,
/// exactly as they travel on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum FileSystemEvent {
    /// A file appeared.
    FileCreated {
        /// Snapshot of the file at observation time.
        descriptor: FileDescriptor,
        /// Root-relative path.
        path: String,
    },
    /// A file's content or timestamp changed.
    FileModified {
        /// Snapshot of the file after the change.
        descriptor: FileDescriptor,
        /// Root-relative path.
        path: String,
    },
    /// A file disappeared.
    FileDeleted {
        /// Last known snapshot of the file.
        descriptor: FileDescriptor,
        /// Root-relative path.
        path: String,
    },
    /// A directory appeared.
    DirectoryCreated {
        /// Root-relative path.
        path: String,
    },
    /// A directory disappeared.
    DirectoryDeleted {
        /// Root-relative path.
        path: String,
    },
}

impl FileSystemEvent {
    /// Root-relative path the event concerns.
    pub fn path(&self) -> &str {
        match self {
            FileSystemEvent::FileCreated { path, .. }
            | FileSystemEvent::FileModified { path, .. }
            | FileSystemEvent::FileDeleted { path, .. }
            | FileSystemEvent::DirectoryCreated { path }
            | FileSystemEvent::DirectoryDeleted { path } => path,
        }
    }
}

/// The request message announcing `event` to a peer.
pub fn request_for(event: &FileSystemEvent) -> Message {
    match event {
        FileSystemEvent::FileCreated { descriptor, path } => {
            Message::FileCreateRequest(FileCreateRequest {
                file_descriptor: descriptor.clone(),
                path_name: path.clone(),
            })
        }
        FileSystemEvent::FileModified { descriptor, path } => {
            Message::FileModifyRequest(FileModifyRequest {
                file_descriptor: descriptor.clone(),
                path_name: path.clone(),
            })
        }
        FileSystemEvent::FileDeleted { descriptor, path } => {
            Message::FileDeleteRequest(FileDeleteRequest {
                file_descriptor: descriptor.clone(),
                path_name: path.clone(),
            })
        }
        FileSystemEvent::DirectoryCreated { path } => {
            Message::DirectoryCreateRequest(DirectoryCreateRequest {
                path_name: path.clone(),
            })
        }
        FileSystemEvent::DirectoryDeleted { path } => {
            Message::DirectoryDeleteRequest(DirectoryDeleteRequest {
                path_name: path.clone(),
            })
        }
    }
}

/// Announce `event` to every connected peer.
///
/// A peer whose queue has closed is skipped; its connection task owns the
/// cleanup. Returns how many peers were actually told.
pub async fn broadcast(registry: &PeerRegistry, event: &FileSystemEvent) -> usize {
    let request = request_for(event);
    let mut told = 0;
    for (address, sender) in registry.connected() {
        match sender.send(request.clone()).await {
            Ok(()) => told += 1,
            Err(_) => {
                tracing::debug!(peer = %address, "skipped closed connection during broadcast");
            }
        }
    }
    tracing::debug!(
        command = request.command(),
        path = event.path(),
        peers = told,
        "event broadcast"
    );
    told
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{spawn_writer, MessageReader};
    use peerbox_types::{decode_line, PeerAddress};

    fn descriptor() -> FileDescriptor {
        FileDescriptor::new("ab12", 1_700_000_000, 42)
    }

    #[test]
    fn events_map_to_their_request_commands() {
        let cases = [
            (
                FileSystemEvent::FileCreated {
                    descriptor: descriptor(),
                    path: "a.txt".into(),
                },
                "FILE_CREATE_REQUEST",
            ),
            (
                FileSystemEvent::FileModified {
                    descriptor: descriptor(),
                    path: "a.txt".into(),
                },
                "FILE_MODIFY_REQUEST",
            ),
            (
                FileSystemEvent::FileDeleted {
                    descriptor: descriptor(),
                    path: "a.txt".into(),
                },
                "FILE_DELETE_REQUEST",
            ),
            (
                FileSystemEvent::DirectoryCreated { path: "d".into() },
                "DIRECTORY_CREATE_REQUEST",
            ),
            (
                FileSystemEvent::DirectoryDeleted { path: "d".into() },
                "DIRECTORY_DELETE_REQUEST",
            ),
        ];
        for (event, command) in cases {
            assert_eq!(request_for(&event).command(), command);
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_every_connected_peer() {
        let registry = PeerRegistry::new(8);
        let mut readers = Vec::new();
        let mut senders = Vec::new();
        for i in 0..3u16 {
            let (write, read) = tokio::io::duplex(4096);
            let (sender, _handle) = spawn_writer(write);
            registry.try_admit(PeerAddress::new("peer", i), &sender);
            senders.push(sender);
            readers.push(MessageReader::new(read));
        }

        let event = FileSystemEvent::DirectoryCreated {
            path: "shared".into(),
        };
        assert_eq!(broadcast(&registry, &event).await, 3);

        for reader in &mut readers {
            let line = reader.next_line().await.unwrap().unwrap();
            match decode_line(&line).unwrap() {
                Message::DirectoryCreateRequest(req) => assert_eq!(req.path_name, "shared"),
                other => panic!("unexpected {}", other.command()),
            }
        }
    }

    #[tokio::test]
    async fn broadcast_skips_peers_whose_connection_died() {
        let registry = PeerRegistry::new(8);
        let (write, read) = tokio::io::duplex(4096);
        let (alive, _handle) = spawn_writer(write);
        registry.try_admit(PeerAddress::new("alive", 1), &alive);
        {
            let (write, _read) = tokio::io::duplex(4096);
            let (dead, _handle) = spawn_writer(write);
            registry.try_admit(PeerAddress::new("dead", 2), &dead);
            // dead sender drops here; registry holds only a weak handle
        }
        tokio::task::yield_now().await;

        let event = FileSystemEvent::FileDeleted {
            descriptor: descriptor(),
            path: "gone.txt".into(),
        };
        assert_eq!(broadcast(&registry, &event).await, 1);

        let mut reader = MessageReader::new(read);
        let line = reader.next_line().await.unwrap().unwrap();
        assert_eq!(
            decode_line(&line).unwrap().command(),
            "FILE_DELETE_REQUEST"
        );
    }
}
