//! The bundle entity.
//!
//! A bundle is the atomic multi-transaction value-transfer unit, identified
//! and stored by its tail transaction hash. Publication is establish-once:
//! the trunk walk mutates a private [`BundleBuilder`], and
//! [`BundleBuilder::finish`] is the only way to obtain a [`Bundle`]. A
//! published bundle has no mutators except the metadata flag word, which is
//! atomic so post-publication updates (milestone confirmation) are safe
//! under concurrent readers.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU8, Ordering};

use filament_types::{Address, BundleFlags, BundleHash, TxHash};

use crate::transaction::Transaction;

/// An assembled bundle, keyed by its tail transaction hash.
#[derive(Debug)]
pub struct Bundle {
    tail: TxHash,
    /// Null until the head transaction is known.
    head: TxHash,
    bundle_hash: BundleHash,
    last_index: u64,
    members: HashSet<TxHash>,
    ledger_changes: HashMap<Address, i64>,
    flags: AtomicU8,
}

impl Bundle {
    pub(crate) fn from_parts(
        tail: TxHash,
        head: TxHash,
        bundle_hash: BundleHash,
        last_index: u64,
        members: HashSet<TxHash>,
        ledger_changes: HashMap<Address, i64>,
        flags: BundleFlags,
    ) -> Self {
        Self {
            tail,
            head,
            bundle_hash,
            last_index,
            members,
            ledger_changes,
            flags: AtomicU8::new(flags.to_bits()),
        }
    }

    /// The tail transaction hash, this bundle's identity key.
    pub fn tail_hash(&self) -> TxHash {
        self.tail
    }

    /// The head transaction hash, or `None` if the walk never reached one.
    pub fn head_hash(&self) -> Option<TxHash> {
        if self.head.is_null() {
            None
        } else {
            Some(self.head)
        }
    }

    /// The bundle hash shared by every member transaction.
    pub fn bundle_hash(&self) -> BundleHash {
        self.bundle_hash
    }

    /// Declared transaction count minus one, from the tail transaction.
    pub fn last_index(&self) -> u64 {
        self.last_index
    }

    /// Hashes of the member transactions. Membership only, no sequence.
    pub fn members(&self) -> &HashSet<TxHash> {
        &self.members
    }

    pub fn contains_member(&self, hash: &TxHash) -> bool {
        self.members.contains(hash)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Per-address net value deltas. Non-empty only for a validated,
    /// non-value-spam bundle.
    pub fn ledger_changes(&self) -> &HashMap<Address, i64> {
        &self.ledger_changes
    }

    /// Every member present and the head known.
    pub fn is_complete(&self) -> bool {
        self.members.len() as u64 == self.last_index.saturating_add(1) && !self.head.is_null()
    }

    /// Snapshot of the metadata flags.
    pub fn flags(&self) -> BundleFlags {
        BundleFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn is_validated(&self) -> bool {
        self.flags().validated
    }

    pub fn is_value_spam(&self) -> bool {
        self.flags().value_spam
    }

    pub fn is_milestone(&self) -> bool {
        self.flags().milestone
    }

    /// Record milestone confirmation. The only post-publication mutation;
    /// atomic, so concurrent readers see either state, never a tear.
    pub fn set_milestone(&self) {
        let bit = BundleFlags {
            milestone: true,
            ..BundleFlags::empty()
        }
        .to_bits();
        self.flags.fetch_or(bit, Ordering::AcqRel);
    }
}

/// Working state of a bundle under construction.
///
/// Exclusively owned by the constructing walk; nothing here is shared, so
/// no synchronization is needed until [`finish`] hands over an immutable
/// [`Bundle`] for publication.
///
/// [`finish`]: BundleBuilder::finish
#[derive(Debug)]
pub(crate) struct BundleBuilder {
    tail: TxHash,
    bundle_hash: BundleHash,
    last_index: u64,
    head: Option<TxHash>,
    members: HashSet<TxHash>,
}

impl BundleBuilder {
    /// Start from the tail transaction. One-transaction bundles are head
    /// and tail at once and are complete immediately.
    pub(crate) fn new(tail_tx: &Transaction) -> Self {
        let mut members = HashSet::new();
        members.insert(tail_tx.hash);
        Self {
            tail: tail_tx.hash,
            bundle_hash: tail_tx.bundle,
            last_index: tail_tx.last_index,
            head: tail_tx.is_head().then_some(tail_tx.hash),
            members,
        }
    }

    pub(crate) fn tail(&self) -> TxHash {
        self.tail
    }

    pub(crate) fn members(&self) -> &HashSet<TxHash> {
        &self.members
    }

    pub(crate) fn contains(&self, hash: &TxHash) -> bool {
        self.members.contains(hash)
    }

    /// The declared member count has been reached.
    pub(crate) fn is_complete(&self) -> bool {
        self.members.len() as u64 == self.last_index.saturating_add(1)
    }

    pub(crate) fn has_head(&self) -> bool {
        self.head.is_some()
    }

    /// Add a trunk-walk transaction, recording it as head if it is one.
    pub(crate) fn add_member(&mut self, tx: &Transaction) {
        if tx.is_head() {
            self.head = Some(tx.hash);
        }
        self.members.insert(tx.hash);
    }

    /// Seal the working state into an immutable bundle.
    pub(crate) fn finish(
        self,
        flags: BundleFlags,
        ledger_changes: HashMap<Address, i64>,
    ) -> Bundle {
        Bundle::from_parts(
            self.tail,
            self.head.unwrap_or_else(TxHash::null),
            self.bundle_hash,
            self.last_index,
            self.members,
            ledger_changes,
            flags,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filament_types::HASH_LEN;

    fn hash(byte: u8) -> TxHash {
        TxHash::from_array([byte; HASH_LEN])
    }

    fn bundle_hash(byte: u8) -> BundleHash {
        BundleHash::from_array([byte; HASH_LEN])
    }

    fn tx(hash_byte: u8, current: u64, last: u64) -> Transaction {
        Transaction::new(hash(hash_byte), hash(hash_byte + 100), hash(200), bundle_hash(9))
            .with_indices(current, last)
    }

    #[test]
    fn single_transaction_bundle_is_complete_immediately() {
        let lone = tx(1, 0, 0);
        let builder = BundleBuilder::new(&lone);
        assert!(builder.is_complete());
        assert!(builder.has_head());

        let bundle = builder.finish(BundleFlags::empty(), HashMap::new());
        assert_eq!(bundle.head_hash(), Some(hash(1)));
        assert_eq!(bundle.tail_hash(), hash(1));
        assert!(bundle.is_complete());
    }

    #[test]
    fn builder_tracks_members_and_head() {
        let tail = tx(1, 0, 2);
        let mid = tx(2, 1, 2);
        let head = tx(3, 2, 2);

        let mut builder = BundleBuilder::new(&tail);
        assert!(!builder.is_complete());
        assert!(!builder.has_head());

        builder.add_member(&mid);
        assert!(builder.contains(&hash(2)));
        assert!(!builder.is_complete());

        builder.add_member(&head);
        assert!(builder.is_complete());
        assert!(builder.has_head());

        let bundle = builder.finish(BundleFlags::empty(), HashMap::new());
        assert_eq!(bundle.member_count(), 3);
        assert!(bundle.contains_member(&hash(2)));
        assert!(!bundle.contains_member(&hash(4)));
        assert_eq!(bundle.head_hash(), Some(hash(3)));
        assert_eq!(bundle.last_index(), 2);
        assert!(bundle.is_complete());
    }

    #[test]
    fn incomplete_bundle_has_no_head() {
        let tail = tx(1, 0, 2);
        let builder = BundleBuilder::new(&tail);
        let bundle = builder.finish(BundleFlags::empty(), HashMap::new());
        assert_eq!(bundle.head_hash(), None);
        assert!(!bundle.is_complete());
    }

    #[test]
    fn milestone_flag_can_be_set_after_publication() {
        let lone = tx(1, 0, 0);
        let bundle = BundleBuilder::new(&lone).finish(
            BundleFlags {
                validated: true,
                ..BundleFlags::empty()
            },
            HashMap::new(),
        );
        assert!(bundle.is_validated());
        assert!(!bundle.is_milestone());

        bundle.set_milestone();
        assert!(bundle.is_milestone());
        // Other flags are untouched.
        assert!(bundle.is_validated());
        assert!(!bundle.is_value_spam());
    }

    #[test]
    fn concurrent_flag_readers_see_consistent_state() {
        use std::sync::Arc;
        use std::thread;

        let lone = tx(1, 0, 0);
        let bundle = Arc::new(BundleBuilder::new(&lone).finish(
            BundleFlags {
                validated: true,
                ..BundleFlags::empty()
            },
            HashMap::new(),
        ));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let bundle = Arc::clone(&bundle);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let flags = bundle.flags();
                        // Validated was set before publication and never clears.
                        assert!(flags.validated);
                    }
                })
            })
            .collect();
        bundle.set_milestone();
        for r in readers {
            r.join().expect("reader panicked");
        }
        assert!(bundle.is_milestone());
    }
}
