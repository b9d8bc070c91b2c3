//! Named cache groups: the read-through lookup path.
//!
//! A lookup for a key goes through these steps:
//!
//! ```text
//!   get(key)
//!     │
//!     ├── LocalStore hit ──────────────────────────────► value
//!     │
//!     ├── PeerRing::route(key)
//!     │      ├── Local / empty ring ── local flights ── Loader::load ───┐
//!     │      └── Remote(peer) ───────── peer flights ─── PeerFetcher::fetch
//!     │                                                                   │
//!     └──────────────── LocalStore::add ◄─────────────────────────────────┘ ──► value
//! ```
//!
//! Loader calls and peer fetches are deduplicated separately, so a peer
//! asking this node for a key only ever waits on this node's loader.

pub mod flight;
pub mod registry;
pub mod storage;

pub use flight::{CallGroup, Flight};
pub use registry::GroupRegistry;
pub use storage::{LocalStore, NegativeCache};

use crate::config::CacheConfig;
use crate::error::{Error, LoadError, Result};
use crate::loader::Loader;
use crate::metrics::GroupMetrics;
use crate::network::PeerFetcher;
use crate::partitioning::{PeerRing, Route};
use crate::types::{CacheStats, PeerId};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A named cache domain backed by one loader.
pub struct CacheGroup {
    name: Arc<str>,
    config: CacheConfig,
    store: Arc<LocalStore>,
    negative: Option<Arc<NegativeCache>>,
    local_flights: CallGroup,
    peer_flights: CallGroup,
    ring: Arc<PeerRing>,
    loader: Arc<dyn Loader>,
    peers: Arc<dyn PeerFetcher>,
    metrics: Arc<GroupMetrics>,
}

impl CacheGroup {
    /// Create a group routing through `ring`, loading owned keys with
    /// `loader` and fetching the rest through `peers`.
    pub fn new(
        config: CacheConfig,
        loader: Arc<dyn Loader>,
        ring: Arc<PeerRing>,
        peers: Arc<dyn PeerFetcher>,
    ) -> Self {
        if config.capacity_bytes == 0 {
            warn!(group = %config.name, "Cache capacity is 0, local store is unbounded");
        }

        let negative = config
            .cache_not_found
            .then(|| Arc::new(NegativeCache::new(config.negative_capacity)));

        Self {
            name: Arc::from(config.name.as_str()),
            store: Arc::new(LocalStore::new(config.capacity_bytes)),
            negative,
            local_flights: CallGroup::new(),
            peer_flights: CallGroup::new(),
            ring,
            loader,
            peers,
            metrics: Arc::new(GroupMetrics::new()),
            config,
        }
    }

    /// Group name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Local store capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.store.capacity()
    }

    /// The loader behind this group.
    pub fn loader(&self) -> &Arc<dyn Loader> {
        &self.loader
    }

    /// The shared peer ring.
    pub fn ring(&self) -> &Arc<PeerRing> {
        &self.ring
    }

    /// Whether this node loads `key` itself rather than asking a peer.
    pub fn owned_by_self(&self, key: &[u8]) -> bool {
        self.ring.owned_by_self(key)
    }

    /// Group metrics.
    pub fn metrics(&self) -> &GroupMetrics {
        &self.metrics
    }

    /// Get the value for `key`, loading it locally or from its owner on a
    /// miss.
    pub async fn get(&self, key: &[u8]) -> Result<Bytes> {
        self.metrics.gets.inc();
        let timer = self.metrics.get_latency.start_timer();

        let result = match self.config.get_timeout {
            Some(deadline) => tokio::time::timeout(deadline, self.lookup(key))
                .await
                .unwrap_or(Err(Error::Timeout)),
            None => self.lookup(key).await,
        };

        timer.stop();
        result
    }

    /// Serve `key` from this node only: the local store, then the loader.
    ///
    /// This is what peers call on the owner, so it never forwards.
    pub async fn load_local(&self, key: &[u8]) -> Result<Bytes> {
        self.metrics.server_requests.inc();

        if let Some(value) = self.cached(key)? {
            return Ok(value);
        }
        self.load_through_flight(Bytes::copy_from_slice(key), Source::Local)
            .await
    }

    /// Drop `key` from this node's store and negative cache.
    pub fn remove(&self, key: &[u8]) {
        self.store.remove(key);
        if let Some(negative) = &self.negative {
            negative.remove(key);
        }
    }

    /// Snapshot of group statistics.
    pub fn stats(&self) -> CacheStats {
        let m = &self.metrics;
        let latency = m.get_latency.snapshot();
        CacheStats {
            gets: m.gets.get(),
            cache_hits: m.cache_hits.get(),
            negative_hits: m.negative_hits.get(),
            loads: m.loads.get(),
            loads_deduped: m.loads_deduped.get(),
            local_loads: m.local_loads.get(),
            local_load_errors: m.local_load_errors.get(),
            peer_loads: m.peer_loads.get(),
            peer_errors: m.peer_errors.get(),
            server_requests: m.server_requests.get(),
            entry_count: self.store.len() as u64,
            size_bytes: self.store.size_bytes(),
            evictions: self.store.evictions(),
            get_latency_mean: latency.mean(),
            get_latency_p99: latency.percentile_bound(99.0).map(Duration::from_secs_f64),
        }
    }

    async fn lookup(&self, key: &[u8]) -> Result<Bytes> {
        if let Some(value) = self.cached(key)? {
            return Ok(value);
        }

        let source = match self.ring.route(key) {
            Some(Route::Remote(peer)) => Source::Peer(peer),
            Some(Route::Local) | None => Source::Local,
        };
        self.load_through_flight(Bytes::copy_from_slice(key), source)
            .await
    }

    /// Check the local store, then the negative cache.
    fn cached(&self, key: &[u8]) -> Result<Option<Bytes>> {
        if let Some(value) = self.store.get(key) {
            self.metrics.cache_hits.inc();
            return Ok(Some(value));
        }

        if self.negative.as_ref().is_some_and(|n| n.contains(key)) {
            self.metrics.negative_hits.inc();
            return Err(LoadError::NotFound.into());
        }

        Ok(None)
    }

    async fn load_through_flight(&self, key: Bytes, source: Source) -> Result<Bytes> {
        let task = LoadTask {
            group: self.name.clone(),
            key: key.clone(),
            source,
            store: self.store.clone(),
            negative: self.negative.clone(),
            loader: self.loader.clone(),
            peers: self.peers.clone(),
            metrics: self.metrics.clone(),
        };

        let flights = match task.source {
            Source::Local => &self.local_flights,
            Source::Peer(_) => &self.peer_flights,
        };
        let (rx, flight) = flights.join(&key, move || task.run());
        match flight {
            Flight::Leader => self.metrics.loads.inc(),
            Flight::Follower => self.metrics.loads_deduped.inc(),
        }

        CallGroup::wait(rx).await
    }
}

impl std::fmt::Debug for CacheGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheGroup")
            .field("name", &self.name)
            .field("store", &self.store)
            .field("local_in_flight", &self.local_flights.in_flight())
            .field("peer_in_flight", &self.peer_flights.in_flight())
            .finish()
    }
}

enum Source {
    Local,
    Peer(PeerId),
}

/// Everything an in-flight load needs, owned so it can run on its own task.
struct LoadTask {
    group: Arc<str>,
    key: Bytes,
    source: Source,
    store: Arc<LocalStore>,
    negative: Option<Arc<NegativeCache>>,
    loader: Arc<dyn Loader>,
    peers: Arc<dyn PeerFetcher>,
    metrics: Arc<GroupMetrics>,
}

impl LoadTask {
    async fn run(self) -> Result<Bytes> {
        // A flight for this key may have filled the store just before ours
        // was registered.
        if let Some(value) = self.store.get(&self.key) {
            return Ok(value);
        }

        let result = match &self.source {
            Source::Local => match self.loader.load(&self.key).await {
                Ok(value) => {
                    self.metrics.local_loads.inc();
                    Ok(value)
                }
                Err(e) => {
                    self.metrics.local_load_errors.inc();
                    debug!(group = %self.group, key = ?self.key, error = %e, "Load failed");
                    Err(Error::from(e))
                }
            },
            Source::Peer(peer) => match self.peers.fetch(peer, &self.group, &self.key).await {
                Ok(value) => {
                    self.metrics.peer_loads.inc();
                    Ok(value)
                }
                Err(e) => {
                    self.metrics.peer_errors.inc();
                    if !e.is_not_found() {
                        warn!(group = %self.group, peer = %peer, error = %e, "Peer fetch failed");
                    }
                    Err(e)
                }
            },
        };

        match &result {
            Ok(value) => {
                if let Some(negative) = &self.negative {
                    negative.remove(&self.key);
                }
                self.store.add(self.key.clone(), value.clone());
            }
            Err(e) if e.is_not_found() => {
                if let Some(negative) = &self.negative {
                    negative.insert(self.key.clone());
                }
            }
            Err(_) => {}
        }

        result
    }
}
