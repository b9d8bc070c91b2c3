//! Backing-store adapters implementing [`Loader`].
//!
//! - [`MemoryBackend`]: a shared in-memory map, for tests and embedding.
//! - [`DirBackend`]: one file per key under a directory.

use crate::error::LoadError;
use crate::loader::{KeyStream, Loader};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

/// In-memory backing store.
///
/// Counts every `load` so tests can assert how often the cache reached the
/// backing store, and can be switched offline to simulate an outage.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: RwLock<BTreeMap<Bytes, Bytes>>,
    loads: AtomicU64,
    offline: AtomicBool,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend pre-filled with `entries`.
    pub fn with_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Bytes>,
        V: Into<Bytes>,
    {
        let backend = Self::new();
        for (key, value) in entries {
            backend.insert(key, value);
        }
        backend
    }

    /// Insert or replace a value.
    pub fn insert(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) {
        self.data.write().insert(key.into(), value.into());
    }

    /// Remove a key.
    pub fn remove(&self, key: &[u8]) {
        self.data.write().remove(key);
    }

    /// Number of `load` calls so far.
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::SeqCst)
    }

    /// Make every call fail with [`LoadError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), LoadError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(LoadError::Unavailable("memory backend offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Loader for MemoryBackend {
    async fn load(&self, key: &[u8]) -> Result<Bytes, LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.data.read().get(key).cloned().ok_or(LoadError::NotFound)
    }

    fn keys(&self) -> KeyStream<'_> {
        if let Err(e) = self.check_online() {
            return Box::pin(stream::once(async move { Err::<Bytes, _>(e) }));
        }
        let keys: Vec<Bytes> = self.data.read().keys().cloned().collect();
        Box::pin(stream::iter(keys.into_iter().map(Ok::<Bytes, LoadError>)))
    }
}

/// Directory-backed store: the file name is the key, its contents the value.
///
/// Keys must be valid UTF-8 file names without path separators; anything else
/// is reported as not found rather than escaping the directory.
#[derive(Debug, Clone)]
pub struct DirBackend {
    root: PathBuf,
}

impl DirBackend {
    /// Open a backend rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory holding the data.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &[u8]) -> Option<PathBuf> {
        let name = std::str::from_utf8(key).ok()?;
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return None;
        }
        Some(self.root.join(name))
    }
}

fn map_io(e: io::Error) -> LoadError {
    match e.kind() {
        io::ErrorKind::NotFound => LoadError::NotFound,
        io::ErrorKind::PermissionDenied => LoadError::Other(e.to_string()),
        _ => LoadError::Unavailable(e.to_string()),
    }
}

#[async_trait]
impl Loader for DirBackend {
    async fn load(&self, key: &[u8]) -> Result<Bytes, LoadError> {
        let path = self.path_for(key).ok_or(LoadError::NotFound)?;
        let data = tokio::fs::read(&path).await.map_err(map_io)?;
        debug!(path = %path.display(), size = data.len(), "Loaded from directory");
        Ok(Bytes::from(data))
    }

    fn keys(&self) -> KeyStream<'_> {
        let listing = stream::unfold(Listing::Open(self.root.clone()), |mut state| async move {
            loop {
                state = match state {
                    Listing::Open(root) => match tokio::fs::read_dir(&root).await {
                        Ok(dir) => Listing::Reading(dir),
                        // The directory itself missing means the store is unreachable
                        Err(e) => {
                            return Some((Err(LoadError::Unavailable(e.to_string())), Listing::Done))
                        }
                    },
                    Listing::Reading(mut dir) => match dir.next_entry().await {
                        Ok(Some(entry)) => {
                            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
                            match (is_file, entry.file_name().to_str()) {
                                (true, Some(name)) => {
                                    let key = Bytes::copy_from_slice(name.as_bytes());
                                    return Some((Ok(key), Listing::Reading(dir)));
                                }
                                _ => Listing::Reading(dir),
                            }
                        }
                        Ok(None) => return None,
                        Err(e) => {
                            return Some((Err(LoadError::Unavailable(e.to_string())), Listing::Done))
                        }
                    },
                    Listing::Done => return None,
                };
            }
        });

        Box::pin(listing)
    }
}

/// Progress of a directory key listing.
enum Listing {
    Open(PathBuf),
    Reading(tokio::fs::ReadDir),
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{StreamExt, TryStreamExt};

    #[tokio::test]
    async fn test_memory_backend_load() {
        let backend = MemoryBackend::with_entries([("a", "1"), ("empty", "")]);

        assert_eq!(backend.load(b"a").await.unwrap(), Bytes::from_static(b"1"));
        assert_eq!(backend.load(b"empty").await.unwrap(), Bytes::new());
        assert_eq!(backend.load(b"nope").await, Err(LoadError::NotFound));
        assert_eq!(backend.load_count(), 3);
    }

    #[tokio::test]
    async fn test_memory_backend_offline() {
        let backend = MemoryBackend::with_entries([("a", "1")]);
        backend.set_offline(true);

        assert!(matches!(backend.load(b"a").await, Err(LoadError::Unavailable(_))));
        let keys: Result<Vec<Bytes>, _> = backend.keys().try_collect().await;
        assert!(matches!(keys, Err(LoadError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_memory_backend_keys_restartable() {
        let backend = MemoryBackend::with_entries([("b", "2"), ("a", "1")]);

        for _ in 0..2 {
            let keys: Vec<Bytes> = backend.keys().try_collect().await.unwrap();
            assert_eq!(keys, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        }
    }

    #[tokio::test]
    async fn test_dir_backend() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("alpha"), b"first").unwrap();
        std::fs::write(dir.path().join("beta"), b"").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let backend = DirBackend::new(dir.path());
        assert_eq!(backend.load(b"alpha").await.unwrap(), Bytes::from_static(b"first"));
        assert_eq!(backend.load(b"beta").await.unwrap(), Bytes::new());
        assert_eq!(backend.load(b"gamma").await, Err(LoadError::NotFound));
        assert_eq!(backend.load(b"../etc/passwd").await, Err(LoadError::NotFound));

        let mut keys: Vec<Bytes> = backend.keys().try_collect().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec![Bytes::from_static(b"alpha"), Bytes::from_static(b"beta")]);
    }

    #[tokio::test]
    async fn test_dir_backend_keys_stream_incrementally() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..10 {
            std::fs::write(dir.path().join(format!("k{i}")), b"v").unwrap();
        }

        let backend = DirBackend::new(dir.path());
        let mut keys = backend.keys();
        let first = keys.next().await.unwrap().unwrap();
        assert!(first.starts_with(b"k"));

        // The rest of the listing is still there after a partial read
        let rest: Vec<Bytes> = keys.try_collect().await.unwrap();
        assert_eq!(rest.len(), 9);
        assert!(!rest.contains(&first));
    }

    #[tokio::test]
    async fn test_dir_backend_missing_root() {
        let backend = DirBackend::new("/definitely/not/here");
        let keys: Result<Vec<Bytes>, _> = backend.keys().try_collect().await;
        assert!(matches!(keys, Err(LoadError::Unavailable(_))));
    }
}
