//! Admitted-peer registry and capacity policy.
//!
//! One mutex is the single authority for admission: the capacity check and
//! the insert happen under the same lock acquisition, so two simultaneous
//! handshakes can never both slip past a full registry.

use std::collections::HashMap;
use std::sync::Mutex;

use peerbox_types::PeerAddress;

use crate::connection::{MessageSender, WeakMessageSender};

/// Outcome of an admission attempt.
#[derive(Debug)]
pub enum Admission {
    /// The peer was registered and counts against capacity.
    Admitted,
    /// The registry is full; `peers` is the bootstrap hint to send back.
    Refused {
        /// Currently admitted peers at the moment of refusal.
        peers: Vec<PeerAddress>,
    },
}

/// Process-wide registry of admitted peers.
///
/// Entries hold weak senders: the registry never keeps a closed connection's
/// queue alive, and dead entries are pruned whenever they are encountered.
pub struct PeerRegistry {
    max_peers: usize,
    inner: Mutex<HashMap<PeerAddress, WeakMessageSender>>,
}

impl std::fmt::Debug for PeerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerRegistry")
            .field("max_peers", &self.max_peers)
            .field("admitted", &self.len())
            .finish()
    }
}

impl PeerRegistry {
    /// Create a registry admitting at most `max_peers` concurrent peers.
    pub fn new(max_peers: usize) -> Self {
        Self {
            max_peers,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Atomically check capacity and register `address`.
    ///
    /// Re-admitting an address already present replaces its sender without
    /// consuming a second slot (the reconnect case).
    pub fn try_admit(&self, address: PeerAddress, sender: &MessageSender) -> Admission {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        inner.retain(|_, weak| weak.upgrade().is_some());
        if inner.len() >= self.max_peers && !inner.contains_key(&address) {
            let peers = inner.keys().cloned().collect();
            tracing::info!(peer = %address, "admission refused, registry full");
            return Admission::Refused { peers };
        }
        inner.insert(address.clone(), sender.downgrade());
        tracing::info!(peer = %address, admitted = inner.len(), "peer admitted");
        Admission::Admitted
    }

    /// Remove a peer on disconnect. Removing an absent peer is a no-op.
    pub fn remove(&self, address: &PeerAddress) {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        if inner.remove(address).is_some() {
            tracing::info!(peer = %address, admitted = inner.len(), "peer removed");
        }
    }

    /// Addresses of currently admitted peers.
    pub fn snapshot(&self) -> Vec<PeerAddress> {
        let inner = self.inner.lock().expect("registry mutex poisoned");
        inner.keys().cloned().collect()
    }

    /// Admitted peers whose connections are still alive, with usable senders.
    pub fn connected(&self) -> Vec<(PeerAddress, MessageSender)> {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        inner.retain(|_, weak| weak.upgrade().is_some());
        inner
            .iter()
            .filter_map(|(addr, weak)| weak.upgrade().map(|s| (addr.clone(), s)))
            .collect()
    }

    /// Number of admitted peers.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("registry mutex poisoned").len()
    }

    /// Whether no peer is admitted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
