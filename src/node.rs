//! A cache node: the peer server, ring, client and groups of one process.

use crate::cache::{CacheGroup, GroupRegistry};
use crate::config::{CacheConfig, NodeConfig};
use crate::error::{Error, Result};
use crate::loader::Loader;
use crate::network::{GroupService, PeerClient, PeerServer};
use crate::partitioning::PeerRing;
use crate::types::PeerId;
use crate::warm::{WarmReport, Warmer};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Everything one process contributes to the cache cluster.
///
/// Creating a node binds its listener immediately so the address is known
/// (and can be advertised) before serving starts; requests arriving before
/// [`serve`](Self::serve) wait in the accept queue. Call `serve` before
/// [`warm`](Self::warm) in a cluster, since peers warm against each other.
pub struct CacheNode {
    config: NodeConfig,
    self_id: PeerId,
    local_addr: SocketAddr,
    ring: Arc<PeerRing>,
    client: Arc<PeerClient>,
    registry: Arc<GroupRegistry>,
    server: Mutex<Option<PeerServer>>,
    shutdown_tx: mpsc::Sender<()>,
}

impl CacheNode {
    /// Bind the peer listener and set up the shared ring and client.
    pub async fn bind(config: NodeConfig) -> Result<Self> {
        let (server, shutdown_tx) = PeerServer::bind(config.bind_addr).await?;
        let local_addr = server.local_addr()?;
        let self_id = config
            .advertise_addr
            .clone()
            .unwrap_or_else(|| PeerId::from(local_addr));

        info!(me = %self_id, addr = %local_addr, "Starting cache node");

        let ring = Arc::new(PeerRing::new(self_id.clone(), config.vnodes_per_peer));
        if !config.peers.is_empty() {
            ring.set(config.peers.iter().cloned());
        }

        Ok(Self {
            client: Arc::new(PeerClient::new(config.client.clone())),
            registry: Arc::new(GroupRegistry::new()),
            server: Mutex::new(Some(server)),
            config,
            self_id,
            local_addr,
            ring,
            shutdown_tx,
        })
    }

    /// This node's identity on the ring.
    pub fn self_id(&self) -> &PeerId {
        &self.self_id
    }

    /// The bound listener address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn ring(&self) -> &Arc<PeerRing> {
        &self.ring
    }

    pub fn client(&self) -> &Arc<PeerClient> {
        &self.client
    }

    pub fn registry(&self) -> &Arc<GroupRegistry> {
        &self.registry
    }

    /// Replace the peer membership shared by every group.
    pub fn set_peers(&self, peers: impl IntoIterator<Item = PeerId>) {
        self.ring.set(peers);
    }

    /// Create and register a group loading from `loader`.
    pub fn new_group(&self, config: CacheConfig, loader: Arc<dyn Loader>) -> Result<Arc<CacheGroup>> {
        let group = CacheGroup::new(config, loader, self.ring.clone(), self.client.clone());
        self.registry.register(group)
    }

    /// Look up a registered group.
    pub fn group(&self, name: &str) -> Result<Arc<CacheGroup>> {
        self.registry
            .get_group(name)
            .ok_or_else(|| Error::GroupNotFound(name.to_string()))
    }

    /// Warm the group `name` using the node's warm configuration.
    pub async fn warm(&self, name: &str) -> Result<WarmReport> {
        let group = self.group(name)?;
        Warmer::new(self.config.warm.clone()).warm(&group).await
    }

    /// Start answering peer requests. Fails if already serving.
    pub fn serve(&self) -> Result<JoinHandle<()>> {
        let server = self
            .server
            .lock()
            .take()
            .ok_or_else(|| Error::Internal("node is already serving".into()))?;
        let service = Arc::new(GroupService::new(self.registry.clone(), self.self_id.clone()));

        Ok(tokio::spawn(async move {
            if let Err(e) = server.run(service).await {
                error!(error = %e, "Peer server error");
            }
        }))
    }

    /// Stop accepting peer requests.
    pub async fn shutdown(&self) {
        info!(me = %self.self_id, "Shutting down cache node");
        let _ = self.shutdown_tx.send(()).await;
    }
}

impl std::fmt::Debug for CacheNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheNode")
            .field("self_id", &self.self_id)
            .field("local_addr", &self.local_addr)
            .field("groups", &self.registry.names())
            .finish()
    }
}
