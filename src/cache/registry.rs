//! Process-owned table of named cache groups.

use super::CacheGroup;
use crate::error::{Error, Result};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Lookup table from group name to [`CacheGroup`].
///
/// Owned by the node and shared with the peer server; there is no global
/// registry.
#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: RwLock<HashMap<String, Arc<CacheGroup>>>,
}

impl GroupRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a group. Names are unique; registering a name twice fails.
    pub fn register(&self, group: CacheGroup) -> Result<Arc<CacheGroup>> {
        let mut groups = self.groups.write();
        if groups.contains_key(group.name()) {
            return Err(Error::Config(format!(
                "group {} already registered",
                group.name()
            )));
        }

        let group = Arc::new(group);
        groups.insert(group.name().to_string(), group.clone());
        info!(group = %group.name(), capacity = group.capacity(), "Registered cache group");
        Ok(group)
    }

    /// Look up a group by name.
    pub fn get_group(&self, name: &str) -> Option<Arc<CacheGroup>> {
        self.groups.read().get(name).cloned()
    }

    /// Get `key` from the group `name`.
    pub async fn get(&self, name: &str, key: &[u8]) -> Result<Bytes> {
        let group = self
            .get_group(name)
            .ok_or_else(|| Error::GroupNotFound(name.to_string()))?;
        group.get(key).await
    }

    /// Names of all registered groups, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered groups.
    pub fn len(&self) -> usize {
        self.groups.read().len()
    }

    /// Whether no group is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::config::{CacheConfig, PeerClientConfig};
    use crate::network::PeerClient;
    use crate::partitioning::PeerRing;
    use crate::types::PeerId;

    fn group(name: &str, backend: Arc<MemoryBackend>) -> CacheGroup {
        let ring = Arc::new(PeerRing::new(PeerId::new("127.0.0.1:1025"), 40));
        let client = Arc::new(PeerClient::new(PeerClientConfig::default()));
        CacheGroup::new(CacheConfig::new(name), backend, ring, client)
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = GroupRegistry::new();
        let backend = Arc::new(MemoryBackend::with_entries([("k", "v")]));
        registry.register(group("users", backend)).unwrap();

        assert_eq!(registry.get("users", b"k").await.unwrap(), Bytes::from_static(b"v"));
        assert!(registry.get_group("users").is_some());
        assert_eq!(registry.names(), vec!["users".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_group() {
        let registry = GroupRegistry::new();
        assert_eq!(
            registry.get("nope", b"k").await,
            Err(Error::GroupNotFound("nope".into()))
        );
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let registry = GroupRegistry::new();
        let backend = Arc::new(MemoryBackend::new());
        registry.register(group("users", backend.clone())).unwrap();

        let err = registry.register(group("users", backend)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(registry.len(), 1);
    }
}
