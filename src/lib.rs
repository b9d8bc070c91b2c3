//! Read-through distributed cache with consistent hashing.
//!
//! Each process is a peer owning a slice of the key space. A lookup is served
//! from local memory when possible, otherwise from the peer that owns the
//! key, and only the owner ever asks the backing store:
//!
//! - **Consistent hashing** assigns every key to exactly one peer
//! - **Single flight** collapses concurrent misses for a key into one load
//! - **Strict LRU** bounds each group's local store by bytes
//! - **Warming** populates the cache from an enumerable backing store
//!
//! # Example
//!
//! ```rust,no_run
//! use hypercache::{backend::MemoryBackend, CacheConfig, CacheNode, NodeConfig, PeerId};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let me = PeerId::new("127.0.0.1:1025");
//!     let config = NodeConfig::new("127.0.0.1:1025".parse()?)
//!         .with_advertise_addr(me.clone())
//!         .with_peers(vec![me, PeerId::new("127.0.0.1:1026")]);
//!
//!     let node = CacheNode::bind(config).await?;
//!     let store = Arc::new(MemoryBackend::with_entries([("user:123", "Alice")]));
//!     let users = node.new_group(CacheConfig::new("users").with_capacity_mb(64), store)?;
//!
//!     node.serve()?;
//!     node.warm("users").await?;
//!
//!     let value = users.get(b"user:123").await?;
//!     println!("Found: {:?}", value);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │            Application Layer                │
//! └─────────────────────────────────────────────┘
//!                     │ get(key)
//!                     ▼
//! ┌─────────────────────────────────────────────┐
//! │                CacheGroup                   │
//! │  LocalStore ─► PeerRing ─► CallGroup        │
//! └─────────────────────────────────────────────┘
//!          │                        │
//!          ▼                        ▼
//!   ┌────────────┐          ┌──────────────┐        ┌────────────┐
//!   │   Loader   │          │  PeerClient  │ ─TCP─► │ PeerServer │
//!   │ (backing)  │          └──────────────┘        │  (owner)   │
//!   └────────────┘                                  └────────────┘
//! ```
//!
//! # Consistency Model
//!
//! - Best effort: values are cached until evicted, there is no invalidation
//!   across peers
//! - A crashed peer loses only its local contents

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod loader;
pub mod metrics;
pub mod network;
pub mod node;
pub mod partitioning;
pub mod testing;
pub mod types;
pub mod warm;

// Re-export main types for convenience
pub use cache::{CacheGroup, GroupRegistry};
pub use config::{CacheConfig, NodeConfig, PeerClientConfig, WarmConfig, WarmScope};
pub use error::{Error, LoadError, NetworkError, Result};
pub use loader::{KeyStream, Loader};
pub use node::CacheNode;
pub use types::{CacheStats, PeerId};
pub use warm::{WarmReport, Warmer};

// Re-export partitioning types
pub use partitioning::{HashRing, PeerRing, Route};

// Re-export network types
pub use network::{PeerClient, PeerFetcher, PeerServer};

// Re-export metrics types
pub use metrics::{Counter, GroupMetrics, Histogram, HistogramSnapshot};

// Re-export testing types
pub use testing::TestCluster;
