//! Testing utilities for the distributed cache.
//!
//! [`TestCluster`] starts several [`CacheNode`]s on loopback TCP, each with
//! its own instrumented [`MemoryBackend`] holding the same key space, so a
//! test can count exactly which node loaded what and how many peer requests
//! each node sent.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         TestCluster                             │
//! │                                                                 │
//! │  ┌────────────────┐   ┌────────────────┐   ┌────────────────┐   │
//! │  │ CacheNode 0    │   │ CacheNode 1    │   │ CacheNode 2    │   │
//! │  │ 127.0.0.1:a    │◄─►│ 127.0.0.1:b    │◄─►│ 127.0.0.1:c    │   │
//! │  │ MemoryBackend  │   │ MemoryBackend  │   │ MemoryBackend  │   │
//! │  └────────────────┘   └────────────────┘   └────────────────┘   │
//! │           shared ring membership: [a, b, c]                     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use hypercache::testing::TestCluster;
//! use hypercache::CacheConfig;
//!
//! let cluster = TestCluster::start(3, CacheConfig::new("hypercache")).await?;
//! let key = cluster.key_owned_by(1).unwrap();
//!
//! cluster.group(0).get(key.as_bytes()).await?;
//! assert_eq!(cluster.client_calls(0), 1);
//! assert_eq!(cluster.loads(1), 1);
//! ```


use crate::backend::MemoryBackend;
use crate::cache::CacheGroup;
use crate::config::{CacheConfig, NodeConfig};
use crate::error::{Error, Result};
use crate::node::CacheNode;
use crate::types::PeerId;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

/// Number of keys every test backend holds: `key-0` .. `key-199`.
pub const KEYSPACE: usize = 200;

/// The value stored for `key-{i}`.
pub fn value_for(i: usize) -> String {
    format!("value-{i}")
}

fn keyspace() -> impl Iterator<Item = (String, String)> {
    (0..KEYSPACE).map(|i| (format!("key-{i}"), value_for(i)))
}

/// A cluster of cache nodes on loopback for integration testing.
pub struct TestCluster {
    /// Nodes in membership order.
    pub nodes: Vec<CacheNode>,

    /// Backing store of each node, same index as `nodes`.
    pub backends: Vec<Arc<MemoryBackend>>,

    /// Name of the group every node registers.
    pub group_name: String,

    /// When the cluster started.
    pub started_at: Instant,

    servers: Vec<JoinHandle<()>>,
}

impl TestCluster {
    /// Start `node_count` nodes with default node settings.
    pub async fn start(node_count: usize, group: CacheConfig) -> Result<Self> {
        Self::start_with(node_count, group, NodeConfig::new(loopback())).await
    }

    /// Start `node_count` nodes from a node configuration template.
    ///
    /// The template's bind address should use port 0; advertised addresses
    /// and peers are filled in from the bound listeners.
    pub async fn start_with(
        node_count: usize,
        group: CacheConfig,
        template: NodeConfig,
    ) -> Result<Self> {
        let mut nodes = Vec::with_capacity(node_count);
        for _ in 0..node_count {
            let mut config = template.clone();
            config.advertise_addr = None;
            nodes.push(CacheNode::bind(config).await?);
        }

        let peers: Vec<PeerId> = nodes.iter().map(|n| n.self_id().clone()).collect();
        let mut backends = Vec::with_capacity(node_count);
        for node in &nodes {
            node.set_peers(peers.clone());
            let backend = Arc::new(MemoryBackend::with_entries(keyspace()));
            node.new_group(group.clone(), backend.clone())?;
            backends.push(backend);
        }

        let servers = nodes
            .iter()
            .map(|node| node.serve())
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            nodes,
            backends,
            group_name: group.name,
            started_at: Instant::now(),
            servers,
        })
    }

    /// Get the number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Peer identities in membership order.
    pub fn peers(&self) -> Vec<PeerId> {
        self.nodes.iter().map(|n| n.self_id().clone()).collect()
    }

    /// The test group on node `index`.
    pub fn group(&self, index: usize) -> Arc<CacheGroup> {
        self.try_group(index)
            .unwrap_or_else(|e| panic!("node {index} has no test group: {e}"))
    }

    fn try_group(&self, index: usize) -> Result<Arc<CacheGroup>> {
        self.nodes
            .get(index)
            .ok_or_else(|| Error::Internal(format!("no node {index}")))?
            .group(&self.group_name)
    }

    /// Index of the node owning `key`.
    pub fn owner_of(&self, key: &[u8]) -> Option<usize> {
        let ring = self.nodes.first()?.ring().snapshot();
        let owner = ring.owner(key)?;
        self.nodes.iter().position(|n| n.self_id() == owner)
    }

    /// The first key of the key space owned by node `index`.
    pub fn key_owned_by(&self, index: usize) -> Option<String> {
        (0..KEYSPACE)
            .map(|i| format!("key-{i}"))
            .find(|key| self.owner_of(key.as_bytes()) == Some(index))
    }

    /// Backing-store loads performed by node `index`.
    pub fn loads(&self, index: usize) -> u64 {
        self.backends[index].load_count()
    }

    /// Backing-store loads across the cluster.
    pub fn total_loads(&self) -> u64 {
        self.backends.iter().map(|b| b.load_count()).sum()
    }

    /// Peer requests sent by node `index`.
    pub fn client_calls(&self, index: usize) -> u64 {
        self.nodes[index].client().calls()
    }

    /// Stop every node's server.
    pub async fn shutdown(self) {
        for node in &self.nodes {
            node.shutdown().await;
        }
        for server in self.servers {
            let _ = server.await;
        }
    }
}

impl std::fmt::Debug for TestCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCluster")
            .field("peers", &self.peers())
            .field("group", &self.group_name)
            .finish()
    }
}

fn loopback() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}
