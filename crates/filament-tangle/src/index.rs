//! Insert-only graph indices.
//!
//! These multimaps are populated once per newly stored transaction and
//! never shrink (pruning lives outside this layer). They answer the
//! reverse lookups the construction engine and the query surface need:
//! who approves a transaction, which transactions share a bundle hash,
//! and the tag/address/first-seen groupings.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::RwLock;

use filament_types::{Address, BundleHash, MilestoneIndex, Tag, TxHash};

/// Generic insert-only multimap from a key to transaction hashes.
pub struct TxIndex<K> {
    inner: RwLock<HashMap<K, HashSet<TxHash>>>,
}

impl<K: Eq + Hash + Copy> TxIndex<K> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, key: K, tx: TxHash) {
        let mut map = self.inner.write().expect("lock poisoned");
        map.entry(key).or_default().insert(tx);
    }

    /// All transaction hashes recorded under `key`. Order is unspecified.
    pub fn get(&self, key: &K) -> Vec<TxHash> {
        let map = self.inner.read().expect("lock poisoned");
        map.get(key).map(|set| set.iter().copied().collect()).unwrap_or_default()
    }

    pub fn contains(&self, key: &K) -> bool {
        let map = self.inner.read().expect("lock poisoned");
        map.contains_key(key)
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.inner.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash + Copy> Default for TxIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Approvee hash (trunk or branch target) to approving transactions.
pub type ApproverIndex = TxIndex<TxHash>;

/// Tag to tagged transactions.
pub type TagIndex = TxIndex<Tag>;

/// Address to referencing transactions.
pub type AddressIndex = TxIndex<Address>;

/// Latest-milestone index at first sight to transactions, recorded only
/// for transactions that were not explicitly requested. Consumed by
/// pruning of unconfirmed transactions, which lives outside this layer.
pub type FirstSeenIndex = TxIndex<MilestoneIndex>;

/// Bundle hash to member transactions, with the tail subset tracked.
///
/// A reattached bundle has several tails for one bundle hash; the tail
/// subset is what maps a bundle hash to every stored bundle instance.
pub struct BundleIndex {
    inner: RwLock<HashMap<BundleHash, BundleEntry>>,
}

#[derive(Default)]
struct BundleEntry {
    members: HashSet<TxHash>,
    tails: HashSet<TxHash>,
}

impl BundleIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, bundle: BundleHash, tx: TxHash, is_tail: bool) {
        let mut map = self.inner.write().expect("lock poisoned");
        let entry = map.entry(bundle).or_default();
        entry.members.insert(tx);
        if is_tail {
            entry.tails.insert(tx);
        }
    }

    /// Every transaction recorded under `bundle`.
    pub fn members(&self, bundle: &BundleHash) -> Vec<TxHash> {
        let map = self.inner.read().expect("lock poisoned");
        map.get(bundle)
            .map(|e| e.members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Every tail transaction recorded under `bundle`.
    pub fn tails(&self, bundle: &BundleHash) -> Vec<TxHash> {
        let map = self.inner.read().expect("lock poisoned");
        map.get(bundle)
            .map(|e| e.tails.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl Default for BundleIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filament_types::HASH_LEN;

    fn hash(byte: u8) -> TxHash {
        TxHash::from_array([byte; HASH_LEN])
    }

    #[test]
    fn multimap_collects_per_key() {
        let index: ApproverIndex = TxIndex::new();
        index.insert(hash(1), hash(10));
        index.insert(hash(1), hash(11));
        index.insert(hash(2), hash(12));

        let mut approvers = index.get(&hash(1));
        approvers.sort();
        assert_eq!(approvers, vec![hash(10), hash(11)]);
        assert_eq!(index.get(&hash(2)), vec![hash(12)]);
        assert!(index.get(&hash(3)).is_empty());
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn duplicate_inserts_collapse() {
        let index: ApproverIndex = TxIndex::new();
        index.insert(hash(1), hash(10));
        index.insert(hash(1), hash(10));
        assert_eq!(index.get(&hash(1)).len(), 1);
    }

    #[test]
    fn bundle_index_tracks_tail_subset() {
        let index = BundleIndex::new();
        let bundle = BundleHash::from_array([7; HASH_LEN]);
        index.insert(bundle, hash(1), true);
        index.insert(bundle, hash(2), false);
        index.insert(bundle, hash(3), false);
        // Reattachment: a second tail for the same bundle hash.
        index.insert(bundle, hash(4), true);

        assert_eq!(index.members(&bundle).len(), 4);
        let mut tails = index.tails(&bundle);
        tails.sort();
        assert_eq!(tails, vec![hash(1), hash(4)]);

        let other = BundleHash::from_array([8; HASH_LEN]);
        assert!(index.members(&other).is_empty());
        assert!(index.tails(&other).is_empty());
    }

    #[test]
    fn concurrent_inserts_are_safe() {
        use std::sync::Arc;
        use std::thread;

        let index: Arc<ApproverIndex> = Arc::new(TxIndex::new());
        let handles: Vec<_> = (0..4u8)
            .map(|i| {
                let index = Arc::clone(&index);
                thread::spawn(move || {
                    for j in 0..16u8 {
                        index.insert(hash(i), hash(100 + j));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("writer panicked");
        }
        assert_eq!(index.len(), 4);
        assert_eq!(index.get(&hash(0)).len(), 16);
    }
}
