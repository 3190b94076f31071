//! In-memory view of which peers are currently reachable via the relay.

use crate::types::peer::PeerId;
use std::collections::HashSet;
use tokio::sync::RwLock;

/// Set of peer ids currently known to be reachable.
///
/// Mutated only by the connection manager in reaction to relay presence
/// events; everything else gets read-only access. No ordering is
/// guaranteed across peers.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    peers: RwLock<HashSet<PeerId>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole registry with a full snapshot.
    pub(crate) async fn apply_snapshot(&self, peers: Vec<PeerId>) {
        let mut guard = self.peers.write().await;
        *guard = peers.into_iter().collect();
    }

    pub(crate) async fn join(&self, peer: PeerId) {
        self.peers.write().await.insert(peer);
    }

    pub(crate) async fn leave(&self, peer: &PeerId) {
        self.peers.write().await.remove(peer);
    }

    /// Drop all entries (the transport was lost; reachability is unknown).
    pub(crate) async fn clear(&self) {
        self.peers.write().await.clear();
    }

    pub async fn contains(&self, peer: &PeerId) -> bool {
        self.peers.read().await.contains(peer)
    }

    pub async fn snapshot(&self) -> Vec<PeerId> {
        self.peers.read().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}
