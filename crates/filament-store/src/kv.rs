use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use crate::error::StoreResult;

/// Persistent key-value backend boundary.
///
/// The cache layers above assume nothing beyond these operations. Keys are
/// opaque bytes; each cache instance owns a reserved one-byte prefix of the
/// key space. Implementations must be safe for concurrent use.
pub trait KvStore: Send + Sync {
    /// Read the value under `key`, or `None` if absent.
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Write `value` under `key`, replacing any previous value.
    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()>;

    /// Remove the value under `key`. Absent keys are a no-op.
    fn delete(&self, key: &[u8]) -> StoreResult<()>;

    /// Existence check without reading the value.
    fn contains(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// All key/value pairs whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// In-memory, BTreeMap-based backend.
///
/// Intended for tests and embedding. All entries are held behind a `RwLock`
/// for safe concurrent access; values are cloned on read.
pub struct MemoryKv {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKv {
    /// Create a new empty backend.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the backend holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().expect("lock poisoned").is_empty()
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.entries.write().expect("lock poisoned").clear();
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let map = self.entries.read().expect("lock poisoned");
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        let mut map = self.entries.write().expect("lock poisoned");
        map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> StoreResult<()> {
        let mut map = self.entries.write().expect("lock poisoned");
        map.remove(key);
        Ok(())
    }

    fn contains(&self, key: &[u8]) -> StoreResult<bool> {
        let map = self.entries.read().expect("lock poisoned");
        Ok(map.contains_key(key))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.entries.read().expect("lock poisoned");
        let pairs = map
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(pairs)
    }
}

impl std::fmt::Debug for MemoryKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKv")
            .field("entry_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_roundtrip() {
        let kv = MemoryKv::new();
        kv.put(b"key", b"value").unwrap();
        assert_eq!(kv.get(b"key").unwrap(), Some(b"value".to_vec()));
        assert_eq!(kv.get(b"missing").unwrap(), None);
    }

    #[test]
    fn put_replaces_previous_value() {
        let kv = MemoryKv::new();
        kv.put(b"key", b"one").unwrap();
        kv.put(b"key", b"two").unwrap();
        assert_eq!(kv.get(b"key").unwrap(), Some(b"two".to_vec()));
        assert_eq!(kv.len(), 1);
    }

    #[test]
    fn delete_is_idempotent() {
        let kv = MemoryKv::new();
        kv.put(b"key", b"value").unwrap();
        kv.delete(b"key").unwrap();
        assert!(!kv.contains(b"key").unwrap());
        // Deleting an absent key is a no-op.
        kv.delete(b"key").unwrap();
    }

    #[test]
    fn contains_without_read() {
        let kv = MemoryKv::new();
        assert!(!kv.contains(b"k").unwrap());
        kv.put(b"k", b"").unwrap();
        assert!(kv.contains(b"k").unwrap());
    }

    #[test]
    fn scan_prefix_respects_boundaries() {
        let kv = MemoryKv::new();
        kv.put(b"a/1", b"1").unwrap();
        kv.put(b"a/2", b"2").unwrap();
        kv.put(b"b/1", b"3").unwrap();

        let pairs = kv.scan_prefix(b"a/").unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0, b"a/1".to_vec());
        assert_eq!(pairs[1].0, b"a/2".to_vec());

        assert!(kv.scan_prefix(b"c/").unwrap().is_empty());
    }

    #[test]
    fn scan_prefix_of_whole_space() {
        let kv = MemoryKv::new();
        kv.put(b"x", b"1").unwrap();
        kv.put(b"y", b"2").unwrap();
        assert_eq!(kv.scan_prefix(b"").unwrap().len(), 2);
    }

    #[test]
    fn clear_removes_everything() {
        let kv = MemoryKv::new();
        kv.put(b"a", b"1").unwrap();
        kv.put(b"b", b"2").unwrap();
        kv.clear();
        assert!(kv.is_empty());
    }

    #[test]
    fn concurrent_writers_do_not_corrupt() {
        use std::sync::Arc;
        use std::thread;

        let kv = Arc::new(MemoryKv::new());
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let kv = Arc::clone(&kv);
                thread::spawn(move || {
                    for j in 0..32u8 {
                        kv.put(&[i, j], &[j]).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("writer panicked");
        }
        assert_eq!(kv.len(), 8 * 32);
    }
}
