//! Configuration types for the cache node and its groups.

use crate::partitioning::DEFAULT_VNODES_PER_PEER;
use crate::types::PeerId;
use std::net::SocketAddr;
use std::time::Duration;

/// Default per-group capacity: 128 MiB.
pub const DEFAULT_CAPACITY_BYTES: u64 = 128 * 1024 * 1024;

/// Configuration for a single named cache group.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Group name, unique within a registry.
    pub name: String,

    /// Capacity of the local store in bytes. 0 disables eviction.
    pub capacity_bytes: u64,

    /// Deadline for a single `get`; the in-flight load keeps running for
    /// other callers when it expires.
    pub get_timeout: Option<Duration>,

    /// Remember `NotFound` results instead of asking the backing store again.
    pub cache_not_found: bool,

    /// Maximum number of remembered missing keys.
    pub negative_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "hypercache".to_string(),
            capacity_bytes: DEFAULT_CAPACITY_BYTES,
            get_timeout: None,
            cache_not_found: false,
            negative_capacity: 1024,
        }
    }
}

impl CacheConfig {
    /// Create a configuration for the group `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the local store capacity in bytes.
    pub fn with_capacity_bytes(mut self, capacity: u64) -> Self {
        self.capacity_bytes = capacity;
        self
    }

    /// Set the local store capacity in MiB.
    pub fn with_capacity_mb(mut self, megabytes: u64) -> Self {
        self.capacity_bytes = megabytes.saturating_mul(1024 * 1024);
        self
    }

    /// Set a deadline for each `get`.
    pub fn with_get_timeout(mut self, timeout: Duration) -> Self {
        self.get_timeout = Some(timeout);
        self
    }

    /// Enable negative caching of `NotFound` results.
    pub fn with_cache_not_found(mut self, enabled: bool) -> Self {
        self.cache_not_found = enabled;
        self
    }

    /// Set how many missing keys negative caching remembers.
    pub fn with_negative_capacity(mut self, entries: usize) -> Self {
        self.negative_capacity = entries;
        self
    }
}

/// Configuration for a cache node: its address, peers and shared services.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address the peer server binds to.
    pub bind_addr: SocketAddr,

    /// Identity other peers use to reach this node. Defaults to the bound
    /// address when unset.
    pub advertise_addr: Option<PeerId>,

    /// Initial peer membership, usually including this node.
    pub peers: Vec<PeerId>,

    /// Virtual nodes per physical peer on the hash ring.
    pub vnodes_per_peer: usize,

    /// Peer client configuration.
    pub client: PeerClientConfig,

    /// Warmer configuration.
    pub warm: WarmConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 1025)),
            advertise_addr: None,
            peers: Vec::new(),
            vnodes_per_peer: DEFAULT_VNODES_PER_PEER,
            client: PeerClientConfig::default(),
            warm: WarmConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Create a configuration binding to `bind_addr`.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Set the identity advertised to other peers.
    pub fn with_advertise_addr(mut self, addr: impl Into<PeerId>) -> Self {
        self.advertise_addr = Some(addr.into());
        self
    }

    /// Set the initial peer membership.
    pub fn with_peers(mut self, peers: Vec<PeerId>) -> Self {
        self.peers = peers;
        self
    }

    /// Set virtual nodes per peer.
    pub fn with_vnodes_per_peer(mut self, vnodes: usize) -> Self {
        self.vnodes_per_peer = vnodes;
        self
    }

    /// Set peer client configuration.
    pub fn with_client_config(mut self, client: PeerClientConfig) -> Self {
        self.client = client;
        self
    }

    /// Set warmer configuration.
    pub fn with_warm_config(mut self, warm: WarmConfig) -> Self {
        self.warm = warm;
        self
    }
}

/// Peer client configuration.
#[derive(Debug, Clone)]
pub struct PeerClientConfig {
    /// Timeout for establishing a connection.
    pub connect_timeout: Duration,

    /// Deadline for a whole request, including waiting for a permit.
    pub request_timeout: Duration,

    /// Maximum remote calls outstanding at once.
    pub max_outstanding: usize,

    /// Idle connections kept per peer for reuse.
    pub max_idle_per_peer: usize,
}

impl Default for PeerClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            max_outstanding: 256,
            max_idle_per_peer: 4,
        }
    }
}

impl PeerClientConfig {
    /// Set connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set request deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the bound on outstanding calls.
    pub fn with_max_outstanding(mut self, max: usize) -> Self {
        self.max_outstanding = max;
        self
    }

    /// Set how many idle connections are kept per peer.
    pub fn with_max_idle_per_peer(mut self, max: usize) -> Self {
        self.max_idle_per_peer = max;
        self
    }
}

/// Which keys a warm pass loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WarmScope {
    /// Every key the backing store enumerates, fetching remote-owned keys
    /// from their owners.
    #[default]
    All,
    /// Only keys this node owns.
    OwnedOnly,
}

/// Warmer configuration.
#[derive(Debug, Clone)]
pub struct WarmConfig {
    /// Maximum concurrent `get`s during a warm pass.
    pub concurrency: usize,

    /// Which keys to warm.
    pub scope: WarmScope,
}

impl Default for WarmConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            scope: WarmScope::All,
        }
    }
}

impl WarmConfig {
    /// Set warm concurrency.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set warm scope.
    pub fn with_scope(mut self, scope: WarmScope) -> Self {
        self.scope = scope;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.name, "hypercache");
        assert_eq!(config.capacity_bytes, 128 * 1024 * 1024);
        assert!(config.get_timeout.is_none());
        assert!(!config.cache_not_found);
    }

    #[test]
    fn test_cache_config_builder() {
        let config = CacheConfig::new("users")
            .with_capacity_mb(2)
            .with_get_timeout(Duration::from_millis(250))
            .with_cache_not_found(true)
            .with_negative_capacity(16);

        assert_eq!(config.name, "users");
        assert_eq!(config.capacity_bytes, 2 * 1024 * 1024);
        assert_eq!(config.get_timeout, Some(Duration::from_millis(250)));
        assert!(config.cache_not_found);
        assert_eq!(config.negative_capacity, 16);
    }

    #[test]
    fn test_node_config_builder() {
        let addr: SocketAddr = "127.0.0.1:7000".parse().unwrap();
        let config = NodeConfig::new(addr)
            .with_advertise_addr("cache-1:7000")
            .with_peers(vec![PeerId::new("cache-1:7000"), PeerId::new("cache-2:7000")])
            .with_vnodes_per_peer(8)
            .with_client_config(PeerClientConfig::default().with_max_outstanding(2))
            .with_warm_config(WarmConfig::default().with_scope(WarmScope::OwnedOnly));

        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.advertise_addr, Some(PeerId::new("cache-1:7000")));
        assert_eq!(config.peers.len(), 2);
        assert_eq!(config.vnodes_per_peer, 8);
        assert_eq!(config.client.max_outstanding, 2);
        assert_eq!(config.warm.scope, WarmScope::OwnedOnly);
    }

    #[test]
    fn test_client_and_warm_defaults() {
        let client = PeerClientConfig::default();
        assert_eq!(client.request_timeout, Duration::from_secs(5));
        assert_eq!(client.connect_timeout, Duration::from_secs(2));

        let warm = WarmConfig::default();
        assert_eq!(warm.concurrency, 4);
        assert_eq!(warm.scope, WarmScope::All);
    }
}
