//! Core types used throughout the distributed cache.

use crate::error::{Error, NetworkError, Result};
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

/// Identity of a peer in the cluster: its `host:port` address.
///
/// Equality and hashing are exact string comparisons; callers are expected to
/// spell every peer's address the same way on every node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(Arc<str>);

impl PeerId {
    /// Create a peer identity from an address, stripping any `http://` prefix
    /// and trailing slash so `http://10.0.0.1:1025/` and `10.0.0.1:1025` agree.
    pub fn new(addr: impl AsRef<str>) -> Self {
        let addr = addr.as_ref().trim();
        let addr = addr
            .strip_prefix("http://")
            .or_else(|| addr.strip_prefix("tcp://"))
            .unwrap_or(addr);
        Self(Arc::from(addr.trim_end_matches('/')))
    }

    /// The address as given.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve the address to a socket address for dialing.
    pub fn resolve(&self) -> Result<SocketAddr> {
        self.0
            .to_socket_addrs()
            .map_err(|e| NetworkError::InvalidAddress(format!("{}: {}", self.0, e)))?
            .next()
            .ok_or_else(|| {
                Error::Network(NetworkError::InvalidAddress(format!(
                    "{}: no addresses resolved",
                    self.0
                )))
            })
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(addr: &str) -> Self {
        PeerId::new(addr)
    }
}

impl From<String> for PeerId {
    fn from(addr: String) -> Self {
        PeerId::new(addr)
    }
}

impl From<SocketAddr> for PeerId {
    fn from(addr: SocketAddr) -> Self {
        PeerId::new(addr.to_string())
    }
}

/// Per-group statistics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Every `get` call, including those that hit.
    pub gets: u64,
    /// Gets answered from the local store.
    pub cache_hits: u64,
    /// Gets answered by the negative cache.
    pub negative_hits: u64,
    /// Loads that ran (after deduplication): local loader or peer.
    pub loads: u64,
    /// Callers that joined a load already in flight.
    pub loads_deduped: u64,
    /// Successful loads from the local loader.
    pub local_loads: u64,
    /// Failed loads from the local loader.
    pub local_load_errors: u64,
    /// Successful loads from a remote peer.
    pub peer_loads: u64,
    /// Failed loads from a remote peer.
    pub peer_errors: u64,
    /// Requests served for other peers.
    pub server_requests: u64,
    /// Entries resident in the local store.
    pub entry_count: u64,
    /// Bytes resident in the local store.
    pub size_bytes: u64,
    /// Entries evicted from the local store.
    pub evictions: u64,
    /// Mean `get` latency.
    pub get_latency_mean: Duration,
    /// Upper bound of the latency bucket holding the 99th percentile; `None`
    /// before any get, or when it lies above every bucket.
    pub get_latency_p99: Option<Duration>,
}

impl CacheStats {
    /// Fraction of gets answered locally.
    pub fn hit_rate(&self) -> f64 {
        if self.gets == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.gets as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_normalizes_scheme() {
        assert_eq!(PeerId::new("http://127.0.0.1:1025"), PeerId::new("127.0.0.1:1025"));
        assert_eq!(PeerId::new("127.0.0.1:1025/").as_str(), "127.0.0.1:1025");
    }

    #[test]
    fn test_peer_id_resolve() {
        let peer = PeerId::new("127.0.0.1:9000");
        assert_eq!(peer.resolve().unwrap(), "127.0.0.1:9000".parse().unwrap());
        assert!(PeerId::new("not an address").resolve().is_err());
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            gets: 4,
            cache_hits: 3,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
