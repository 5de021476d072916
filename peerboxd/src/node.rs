//! Daemon assembly: listener, outbound connector, and the scanner pump.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use peerbox_core::{
    broadcast, handshake, spawn_writer, Dispatcher, HandshakeError, MessageReader, PeerRegistry,
};
use peerbox_fs::{LocalFileSystem, Watcher};
use peerbox_types::PeerAddress;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::config::Config;

const EVENT_QUEUE_DEPTH: usize = 1024;

/// A running peerbox node's shared pieces.
#[derive(Clone)]
pub struct Node {
    config: Arc<Config>,
    registry: Arc<PeerRegistry>,
    fs: Arc<LocalFileSystem>,
}

impl Node {
    /// Assemble a node from configuration, creating the share root if it
    /// does not exist yet.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.sync.root).with_context(|| {
            format!("failed to create share root {}", config.sync.root.display())
        })?;
        let registry = Arc::new(PeerRegistry::new(config.limits.max_peers));
        let fs = Arc::new(LocalFileSystem::new(&config.sync.root));
        Ok(Self {
            config: Arc::new(config),
            registry,
            fs,
        })
    }

    /// Bind the listening socket.
    pub async fn bind(self) -> anyhow::Result<BoundNode> {
        let bind_address = ("0.0.0.0", self.config.node.port);
        let listener = TcpListener::bind(bind_address)
            .await
            .with_context(|| format!("failed to bind port {}", self.config.node.port))?;
        tracing::info!(
            address = %self.config.advertised(),
            port = listener.local_addr()?.port(),
            "listening"
        );
        Ok(BoundNode {
            node: self,
            listener,
        })
    }

    fn spawn_scanner(&self) {
        let (tx, mut rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        Watcher::new(self.fs.root(), self.config.scan_interval()).spawn(tx);
        let registry = self.registry.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                broadcast(&registry, &event).await;
            }
        });
    }

    fn spawn_bootstrap(&self) -> anyhow::Result<()> {
        for target in self.config.bootstrap_peers()? {
            let node = self.clone();
            tokio::spawn(async move { node.connect_out(target).await });
        }
        Ok(())
    }

    /// Dial `target`, following `CONNECTION_REFUSED` referrals until a
    /// handshake succeeds or every referred peer has been tried.
    async fn connect_out(self, target: PeerAddress) {
        let mut candidates = vec![target];
        let mut tried: HashSet<PeerAddress> = HashSet::new();
        while let Some(peer) = candidates.pop() {
            if !tried.insert(peer.clone()) {
                continue;
            }
            match self.clone().try_dial(&peer).await {
                Ok(()) => return,
                Err(HandshakeError::RemoteRefused { peers }) => {
                    tracing::info!(peer = %peer, referred = peers.len(), "refused, trying referrals");
                    candidates.extend(peers);
                }
                Err(e) => {
                    tracing::warn!(peer = %peer, "outbound connection failed: {}", e);
                }
            }
        }
        tracing::warn!("no bootstrap peer accepted the connection");
    }

    async fn try_dial(self, peer: &PeerAddress) -> Result<(), HandshakeError> {
        let stream = TcpStream::connect((peer.host.as_str(), peer.port)).await?;
        let (read_half, write_half) = stream.into_split();
        let (sender, writer) = spawn_writer(write_half);
        let mut reader = MessageReader::new(read_half);

        let admitted = handshake::initiate(
            &mut reader,
            &sender,
            &self.registry,
            &self.config.advertised(),
            self.config.handshake_timeout(),
        )
        .await?;

        let node = self.clone();
        tokio::spawn(async move {
            node.run_dispatcher(admitted, sender, reader).await;
            let _ = writer.await;
        });
        Ok(())
    }

    async fn serve_inbound(self, stream: TcpStream, remote: std::net::SocketAddr) {
        let (read_half, write_half) = stream.into_split();
        let (sender, writer) = spawn_writer(write_half);
        let mut reader = MessageReader::new(read_half);

        let outcome = handshake::accept(
            &mut reader,
            &sender,
            &self.registry,
            &self.config.advertised(),
            self.config.handshake_timeout(),
        )
        .await;
        match outcome {
            Ok(peer) => self.run_dispatcher(peer, sender, reader).await,
            Err(e) => {
                tracing::info!(remote = %remote, "handshake failed: {}", e);
                drop(sender);
            }
        }
        // Let queued replies reach the socket before it closes.
        let _ = writer.await;
    }

    async fn run_dispatcher(
        &self,
        peer: PeerAddress,
        sender: peerbox_core::MessageSender,
        mut reader: MessageReader<tokio::net::tcp::OwnedReadHalf>,
    ) {
        let dispatcher = Dispatcher::new(
            peer.clone(),
            sender,
            self.fs.clone(),
            self.config.protocol(),
        );
        if let Err(e) = dispatcher.run(&mut reader).await {
            tracing::warn!(peer = %peer, "connection terminated: {}", e);
        }
        self.registry.remove(&peer);
    }
}

/// A node with its listening socket bound.
pub struct BoundNode {
    node: Node,
    listener: TcpListener,
}

impl BoundNode {
    /// The actual bound address, useful when the configured port is 0.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the scanner, bootstrap connections, and the accept loop.
    pub async fn serve(self) -> anyhow::Result<()> {
        self.node.spawn_scanner();
        self.node.spawn_bootstrap()?;
        loop {
            let (stream, remote) = self.listener.accept().await?;
            tracing::debug!(remote = %remote, "inbound connection");
            let node = self.node.clone();
            tokio::spawn(node.serve_inbound(stream, remote));
        }
    }
}
