use std::collections::HashSet;
use std::sync::RwLock;

use filament_types::Address;

/// Tracker of addresses that have ever been a debit source.
///
/// An address with a negative ledger delta has revealed its public key;
/// reusing it is unsafe, so nodes track the set. The feature is optional:
/// with tracking disabled, [`mark`] records nothing and always reports
/// "not newly marked".
///
/// [`mark`]: SpentAddresses::mark
pub struct SpentAddresses {
    enabled: bool,
    inner: RwLock<HashSet<Address>>,
}

impl SpentAddresses {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            inner: RwLock::new(HashSet::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record `address` as spent. Idempotent; returns `true` only when
    /// this call added it.
    pub fn mark(&self, address: Address) -> bool {
        if !self.enabled {
            return false;
        }
        let mut set = self.inner.write().expect("lock poisoned");
        set.insert(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        let set = self.inner.read().expect("lock poisoned");
        set.contains(address)
    }

    /// Number of tracked spent addresses.
    pub fn len(&self) -> usize {
        self.inner.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
