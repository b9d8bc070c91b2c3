//! Bounded, size-aware LRU storage for a single cache group.

use crate::metrics::Counter;
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// Local cache storage with strict LRU eviction by byte size.
///
/// Each entry is weighed by the length of its value. After every insert the
/// least recently used entries are evicted until the resident size fits the
/// capacity. A capacity of 0 disables eviction.
pub struct LocalStore {
    inner: Mutex<Inner>,

    /// Capacity in bytes; 0 means unbounded.
    capacity: u64,

    evictions: Counter,
}

struct Inner {
    entries: LruCache<Bytes, Bytes>,
    size_bytes: u64,
}

impl Inner {
    fn pop_oldest(&mut self) -> Option<(Bytes, Bytes)> {
        let (key, value) = self.entries.pop_lru()?;
        self.size_bytes -= weigh(&value);
        Some((key, value))
    }
}

fn weigh(value: &Bytes) -> u64 {
    value.len() as u64
}

impl LocalStore {
    /// Create a store bounded to `capacity` bytes (0 = unbounded).
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                size_bytes: 0,
            }),
            capacity,
            evictions: Counter::new(),
        }
    }

    /// Look up a value, marking it most recently used on a hit.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.inner.lock().entries.get(key).cloned()
    }

    /// Check for a key without touching its recency.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.inner.lock().entries.contains(key)
    }

    /// Insert or replace a value, then evict until within capacity.
    pub fn add(&self, key: Bytes, value: Bytes) {
        let mut inner = self.inner.lock();

        let size = weigh(&value);
        if let Some(old) = inner.entries.put(key, value) {
            inner.size_bytes -= weigh(&old);
        }
        inner.size_bytes += size;

        if self.capacity == 0 {
            return;
        }

        while inner.size_bytes > self.capacity {
            if inner.pop_oldest().is_none() {
                break;
            }
            self.evictions.inc();
        }
    }

    /// Evict exactly one entry, the least recently used, if any.
    pub fn remove_oldest(&self) -> Option<Bytes> {
        let evicted = self.inner.lock().pop_oldest();
        if evicted.is_some() {
            self.evictions.inc();
        }
        evicted.map(|(key, _)| key)
    }

    /// Remove a key, returning its value.
    pub fn remove(&self, key: &[u8]) -> Option<Bytes> {
        let mut inner = self.inner.lock();
        let value = inner.entries.pop(key)?;
        inner.size_bytes -= weigh(&value);
        Some(value)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.size_bytes = 0;
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently resident.
    pub fn size_bytes(&self) -> u64 {
        self.inner.lock().size_bytes
    }

    /// Capacity in bytes; 0 means unbounded.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Evictions so far.
    pub fn evictions(&self) -> u64 {
        self.evictions.get()
    }
}

/// Remembers keys the backing store reported missing.
///
/// Bounded by entry count rather than bytes: entries carry no value, and a
/// burst of misses must not be able to grow it without limit.
pub struct NegativeCache {
    keys: Mutex<LruCache<Bytes, ()>>,
}

impl NegativeCache {
    /// Create a cache remembering up to `max_entries` keys (at least one).
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            keys: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Whether `key` is known to be missing; refreshes its recency.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.keys.lock().get(key).is_some()
    }

    /// Record `key` as missing.
    pub fn insert(&self, key: Bytes) {
        self.keys.lock().put(key, ());
    }

    /// Forget `key`.
    pub fn remove(&self, key: &[u8]) {
        self.keys.lock().pop(key);
    }

    /// Number of remembered keys.
    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    /// Whether nothing is remembered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("entry_count", &self.len())
            .field("size_bytes", &self.size_bytes())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_add_and_get() {
        let store = LocalStore::new(1000);
        store.add(b("key1"), b("value1"));

        assert_eq!(store.get(b"key1"), Some(b("value1")));
        assert_eq!(store.get(b"missing"), None);
    }

    #[test]
    fn test_replace_adjusts_size() {
        let store = LocalStore::new(1000);
        store.add(b("k"), b("aaaa"));
        store.add(b("k"), b("bb"));

        assert_eq!(store.len(), 1);
        assert_eq!(store.size_bytes(), 2);
        assert_eq!(store.get(b"k"), Some(b("bb")));
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let store = LocalStore::new(3);
        store.add(b("a"), b("1"));
        store.add(b("b"), b("2"));
        store.add(b("c"), b("3"));

        // Touch "a" so "b" becomes the oldest
        assert!(store.get(b"a").is_some());
        store.add(b("d"), b("4"));

        assert!(!store.contains(b"b"));
        assert!(store.contains(b"a"));
        assert!(store.contains(b"c"));
        assert!(store.contains(b"d"));
        assert_eq!(store.evictions(), 1);
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let store = LocalStore::new(64);
        for i in 0..500u32 {
            let len = (i % 17) as usize;
            store.add(Bytes::from(i.to_string()), Bytes::from(vec![b'x'; len]));
            assert!(store.size_bytes() <= 64);
        }
    }

    #[test]
    fn test_oversized_value_is_not_retained() {
        let store = LocalStore::new(1);
        store.add(b("k1"), b("A"));
        store.add(b("k2"), b("BB"));

        assert!(!store.contains(b"k1"));
        assert!(!store.contains(b"k2"));
        assert_eq!(store.size_bytes(), 0);
    }

    #[test]
    fn test_zero_capacity_is_unbounded() {
        let store = LocalStore::new(0);
        for i in 0..100u32 {
            store.add(Bytes::from(i.to_string()), Bytes::from(vec![0u8; 100]));
        }
        assert_eq!(store.len(), 100);
        assert_eq!(store.size_bytes(), 10_000);
        assert_eq!(store.evictions(), 0);
    }

    #[test]
    fn test_remove_oldest() {
        let store = LocalStore::new(0);
        store.add(b("first"), b("1"));
        store.add(b("second"), b("2"));

        assert_eq!(store.remove_oldest(), Some(b("first")));
        assert_eq!(store.len(), 1);
        assert_eq!(store.remove_oldest(), Some(b("second")));
        assert_eq!(store.remove_oldest(), None);
    }

    #[test]
    fn test_empty_value_is_a_hit() {
        let store = LocalStore::new(10);
        store.add(b(""), Bytes::new());

        assert_eq!(store.get(b""), Some(Bytes::new()));
        assert_eq!(store.size_bytes(), 0);
    }

    #[test]
    fn test_negative_cache_bounded() {
        let negative = NegativeCache::new(2);
        negative.insert(b("a"));
        negative.insert(b("b"));
        assert!(negative.contains(b"a"));

        // "b" is now the least recently used
        negative.insert(b("c"));
        assert!(!negative.contains(b"b"));
        assert!(negative.contains(b"a"));
        assert_eq!(negative.len(), 2);

        negative.remove(b"a");
        assert!(!negative.contains(b"a"));
    }

    #[test]
    fn test_remove_and_clear() {
        let store = LocalStore::new(100);
        store.add(b("a"), b("123"));
        store.add(b("b"), b("45"));

        assert_eq!(store.remove(b"a"), Some(b("123")));
        assert_eq!(store.size_bytes(), 2);

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.size_bytes(), 0);
    }
}
