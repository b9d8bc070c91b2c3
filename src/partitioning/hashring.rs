//! Consistent hashing implementation with virtual nodes.
//!
//! Each physical peer is represented by several virtual nodes (vnodes) so
//! that keys spread evenly even with few peers.

use crate::types::PeerId;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hasher;
use twox_hash::XxHash64;

/// Default number of virtual nodes per physical peer.
pub const DEFAULT_VNODES_PER_PEER: usize = 40;

/// Where a key should be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// This process owns the key.
    Local,
    /// Another peer owns the key.
    Remote(PeerId),
}

impl Route {
    /// Whether the key is owned by this process.
    pub fn is_local(&self) -> bool {
        matches!(self, Route::Local)
    }
}

/// A physical peer on the ring, with "is this me?" resolved at build time.
#[derive(Debug, Clone)]
struct RingPeer {
    id: PeerId,
    is_self: bool,
}

/// A consistent hash ring mapping keys to peers.
///
/// The ring is an immutable value once built; membership changes build a new
/// ring (see [`PeerRing`](super::PeerRing)).
#[derive(Debug, Clone)]
pub struct HashRing {
    /// Virtual node position -> index into `peers`.
    vnodes: BTreeMap<u64, usize>,

    /// Number of virtual nodes per physical peer.
    vnodes_per_peer: usize,

    /// Physical peers in insertion order.
    peers: Vec<RingPeer>,
}

impl HashRing {
    /// Create an empty ring with the default vnode count.
    pub fn new() -> Self {
        Self::with_vnodes(DEFAULT_VNODES_PER_PEER)
    }

    /// Create an empty ring with a custom vnode count (at least 1).
    pub fn with_vnodes(vnodes_per_peer: usize) -> Self {
        Self {
            vnodes: BTreeMap::new(),
            vnodes_per_peer: vnodes_per_peer.max(1),
            peers: Vec::new(),
        }
    }

    /// Build a ring for `peers`, marking `self_id` as the local peer.
    ///
    /// Duplicate peers are ignored. When two vnodes hash to the same position
    /// the peer listed first keeps it.
    pub fn build(vnodes_per_peer: usize, self_id: Option<&PeerId>, peers: &[PeerId]) -> Self {
        let mut ring = Self::with_vnodes(vnodes_per_peer);
        for peer in peers {
            let is_self = self_id == Some(peer);
            ring.add_peer(peer.clone(), is_self);
        }
        ring
    }

    fn add_peer(&mut self, id: PeerId, is_self: bool) {
        if self.peers.iter().any(|p| p.id == id) {
            return;
        }

        let index = self.peers.len();
        for i in 0..self.vnodes_per_peer {
            let vnode_key = format!("{}:{}", id, i);
            let hash = Self::hash_key(vnode_key.as_bytes());
            self.vnodes.entry(hash).or_insert(index);
        }
        self.peers.push(RingPeer { id, is_self });
    }

    /// Number of virtual nodes per peer.
    pub fn vnodes_per_peer(&self) -> usize {
        self.vnodes_per_peer
    }

    /// Number of physical peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether the ring has no peers.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Peers in insertion order.
    pub fn peers(&self) -> impl Iterator<Item = &PeerId> {
        self.peers.iter().map(|p| &p.id)
    }

    /// The peer owning `key`, or `None` if the ring is empty.
    pub fn owner(&self, key: &[u8]) -> Option<&PeerId> {
        self.owner_index(key).map(|i| &self.peers[i].id)
    }

    /// Route for `key`, or `None` if the ring is empty.
    pub fn route(&self, key: &[u8]) -> Option<Route> {
        self.owner_index(key).map(|i| {
            let peer = &self.peers[i];
            if peer.is_self {
                Route::Local
            } else {
                Route::Remote(peer.id.clone())
            }
        })
    }

    fn owner_index(&self, key: &[u8]) -> Option<usize> {
        let hash = Self::hash_key(key);

        // First vnode >= hash, or wrap around to the first one
        self.vnodes
            .range(hash..)
            .next()
            .or_else(|| self.vnodes.iter().next())
            .map(|(_, &index)| index)
    }

    /// Calculate the hash of a key using xxHash64.
    fn hash_key(key: &[u8]) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(key);
        hasher.finish()
    }

    /// Count owners over a synthetic key sample; for monitoring and tests.
    pub fn distribution(&self, sample_size: usize) -> HashMap<PeerId, usize> {
        let mut distribution = HashMap::new();

        for i in 0..sample_size {
            let key = format!("sample_key_{}", i);
            if let Some(owner) = self.owner(key.as_bytes()) {
                *distribution.entry(owner.clone()).or_insert(0) += 1;
            }
        }

        distribution
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new()
    }
}
