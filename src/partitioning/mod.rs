//! Partitioning module for assigning keys to peers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         PeerRing                            │
//! │   RwLock<Arc<HashRing>>  (swapped whole on membership set)  │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │                    HashRing                          │   │
//! │  │  ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐     │   │
//! │  │  │VN:p1│→│VN:p2│→│VN:p3│→│VN:p1│→│VN:p2│→│VN:p3│     │   │
//! │  │  └─────┘ └─────┘ └─────┘ └─────┘ └─────┘ └─────┘     │   │
//! │  │        40 virtual nodes per physical peer            │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │                                                             │
//! │  Key "user:123" → xxh64 → next VN clockwise → p2            │
//! │                        → Route::Remote(p2) / Route::Local   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod hashring;

pub use hashring::{HashRing, Route, DEFAULT_VNODES_PER_PEER};

use crate::types::PeerId;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

/// Shared, membership-aware view of the ring.
///
/// Readers take a cheap snapshot of the current ring; `set` builds the new
/// ring outside the lock and swaps it in, so a lookup never sees a partially
/// built ring.
#[derive(Debug)]
pub struct PeerRing {
    self_id: PeerId,
    vnodes_per_peer: usize,
    ring: RwLock<Arc<HashRing>>,
}

impl PeerRing {
    /// Create an empty ring for the local peer `self_id`.
    pub fn new(self_id: PeerId, vnodes_per_peer: usize) -> Self {
        Self {
            self_id,
            vnodes_per_peer: vnodes_per_peer.max(1),
            ring: RwLock::new(Arc::new(HashRing::with_vnodes(vnodes_per_peer))),
        }
    }

    /// The local peer.
    pub fn self_id(&self) -> &PeerId {
        &self.self_id
    }

    /// Replace the peer membership.
    ///
    /// `peers` may or may not include the local peer; it is not added
    /// implicitly, so a node can route everything elsewhere if asked to.
    pub fn set(&self, peers: impl IntoIterator<Item = PeerId>) {
        let peers: Vec<PeerId> = peers.into_iter().collect();
        let ring = HashRing::build(self.vnodes_per_peer, Some(&self.self_id), &peers);

        info!(
            me = %self.self_id,
            peers = ring.len(),
            vnodes = self.vnodes_per_peer,
            "Peer ring updated"
        );

        *self.ring.write() = Arc::new(ring);
    }

    /// Snapshot of the current ring.
    pub fn snapshot(&self) -> Arc<HashRing> {
        self.ring.read().clone()
    }

    /// Route for `key`; `None` when no peers are configured.
    pub fn route(&self, key: &[u8]) -> Option<Route> {
        self.snapshot().route(key)
    }

    /// Whether the local peer should load `key` itself.
    ///
    /// An empty ring means a single-node deployment, so everything is local.
    pub fn owned_by_self(&self, key: &[u8]) -> bool {
        self.route(key).map_or(true, |route| route.is_local())
    }

    /// Current peers in membership order.
    pub fn peers(&self) -> Vec<PeerId> {
        self.snapshot().peers().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ring_is_local() {
        let ring = PeerRing::new(PeerId::new("me:1"), 40);
        assert!(ring.route(b"key").is_none());
        assert!(ring.owned_by_self(b"key"));
    }

    #[test]
    fn test_set_replaces_membership() {
        let ring = PeerRing::new(PeerId::new("me:1"), 40);
        ring.set(vec![PeerId::new("me:1"), PeerId::new("other:1")]);
        assert_eq!(ring.peers().len(), 2);

        ring.set(vec![PeerId::new("other:1")]);
        assert_eq!(ring.peers(), vec![PeerId::new("other:1")]);
        assert_eq!(
            ring.route(b"anything"),
            Some(Route::Remote(PeerId::new("other:1")))
        );
        assert!(!ring.owned_by_self(b"anything"));
    }

    #[test]
    fn test_snapshot_survives_set() {
        let ring = PeerRing::new(PeerId::new("me:1"), 40);
        ring.set(vec![PeerId::new("me:1")]);
        let before = ring.snapshot();

        ring.set(vec![PeerId::new("a:1"), PeerId::new("b:1")]);

        // The old snapshot is untouched
        assert_eq!(before.len(), 1);
        assert_eq!(ring.snapshot().len(), 2);
    }
}
