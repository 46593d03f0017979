//! The tangle store and bundle construction engine.
//!
//! [`Tangle`] is the explicit context object tying the layer together: the
//! transaction and bundle caches, the graph indices, and the external
//! collaborators (milestone provider, spent-address set, event bus). It is
//! handed to every entry point rather than living in globals, so tests can
//! substitute any collaborator.
//!
//! # Construction
//!
//! Bundles are assembled by walking trunk links forward from a tail. Two
//! triggers exist: ingestion of a possible milestone member (best-effort)
//! and a tail turning solid (must succeed). Per-tail atomicity comes
//! entirely from the bundle cache's `compute_if_absent`; the winning
//! caller validates, computes ledger changes, marks spent addresses, and
//! runs the milestone hand-off inside the factory, then emits events once
//! the bundle is published. Racers receive the published bundle and do
//! nothing.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use filament_store::{CacheConfig, CacheRef, KvStore, ObjectCache};
use filament_types::{Address, BundleFlags, BundleHash, MilestoneIndex, Tag, TxHash};

use crate::bundle::{Bundle, BundleBuilder};
use crate::error::TangleResult;
use crate::event::{EventBus, TangleEvent};
use crate::index::{AddressIndex, ApproverIndex, BundleIndex, FirstSeenIndex, TagIndex, TxIndex};
use crate::milestone::MilestoneProvider;
use crate::spent::SpentAddresses;
use crate::transaction::Transaction;
use crate::validation::{balance_closed, ledger_changes, BundleValidator};

/// Reserved key-space prefix for transaction records.
pub const TX_KEYSPACE: u8 = 0x01;

/// Reserved key-space prefix for bundle records.
pub const BUNDLE_KEYSPACE: u8 = 0x02;

/// Configuration for a [`Tangle`] instance.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TangleConfig {
    /// Track addresses that appear as debit sources.
    pub spent_addresses_enabled: bool,
    /// Tuning for the transaction cache.
    pub transaction_cache: CacheConfig,
    /// Tuning for the bundle cache.
    pub bundle_cache: CacheConfig,
    /// Per-subscriber event buffer size.
    pub event_capacity: usize,
}

impl Default for TangleConfig {
    fn default() -> Self {
        Self {
            spent_addresses_enabled: true,
            transaction_cache: CacheConfig::default(),
            bundle_cache: CacheConfig::default(),
            event_capacity: 1024,
        }
    }
}

/// Outcome of a trunk walk.
enum Walk {
    /// The walk stopped at a valid boundary (declared count reached, head
    /// found, self-referencing trunk, or a trunk leaving the bundle).
    Complete,
    /// A trunk transaction is not in the store; construction defers until
    /// the solidifier re-triggers it.
    MissingTrunk,
}

/// Ledger object storage and bundle assembly for one node.
pub struct Tangle {
    transactions: Arc<ObjectCache<Transaction>>,
    bundles: Arc<ObjectCache<Bundle>>,
    approvers: ApproverIndex,
    bundle_index: BundleIndex,
    tags: TagIndex,
    addresses: AddressIndex,
    first_seen: FirstSeenIndex,
    milestones: Arc<dyn MilestoneProvider>,
    validator: Arc<dyn BundleValidator>,
    spent: SpentAddresses,
    events: EventBus,
}

impl Tangle {
    /// Assemble a tangle over `kv` with the given collaborators.
    pub fn new(
        kv: Arc<dyn KvStore>,
        milestones: Arc<dyn MilestoneProvider>,
        validator: Arc<dyn BundleValidator>,
        config: TangleConfig,
    ) -> Self {
        Self {
            transactions: Arc::new(ObjectCache::new(
                Arc::clone(&kv),
                TX_KEYSPACE,
                config.transaction_cache,
            )),
            bundles: Arc::new(ObjectCache::new(
                kv,
                BUNDLE_KEYSPACE,
                config.bundle_cache,
            )),
            approvers: TxIndex::new(),
            bundle_index: BundleIndex::new(),
            tags: TxIndex::new(),
            addresses: TxIndex::new(),
            first_seen: TxIndex::new(),
            milestones,
            validator,
            spent: SpentAddresses::new(config.spent_addresses_enabled),
            events: EventBus::new(config.event_capacity),
        }
    }

    /// Subscribe to publication events. Fire-and-forget semantics; only
    /// events emitted after this call are delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<TangleEvent> {
        self.events.subscribe()
    }

    /// The transaction cache, e.g. for spawning its evictor task.
    pub fn transaction_cache(&self) -> &Arc<ObjectCache<Transaction>> {
        &self.transactions
    }

    /// The bundle cache, e.g. for spawning its evictor task.
    pub fn bundle_cache(&self) -> &Arc<ObjectCache<Bundle>> {
        &self.bundles
    }

    /// The spent-address tracker.
    pub fn spent_addresses(&self) -> &SpentAddresses {
        &self.spent
    }

    // ---------------------------------------------------------------
    // Transaction surface
    // ---------------------------------------------------------------

    /// Acquire a handle to a stored transaction.
    pub fn transaction(&self, hash: &TxHash) -> TangleResult<Option<CacheRef<Transaction>>> {
        Ok(self.transactions.load(hash.as_bytes())?)
    }

    pub fn contains_transaction(&self, hash: &TxHash) -> TangleResult<bool> {
        Ok(self.transactions.contains(hash.as_bytes())?)
    }

    /// Store a verified transaction and index it.
    ///
    /// Returns the handle and whether the transaction already existed. On
    /// first store the graph indices are populated and, if the milestone
    /// candidate screen matches, bundle construction is attempted
    /// best-effort. Construction normally waits for the tail to turn
    /// solid; milestone members cannot wait that long.
    pub fn ingest_transaction(
        &self,
        tx: Transaction,
        first_seen: MilestoneIndex,
        requested: bool,
    ) -> TangleResult<(CacheRef<Transaction>, bool)> {
        let hash = tx.hash;
        let mut newly_stored = false;
        let handle = self.transactions.compute_if_absent(hash.as_bytes(), || {
            newly_stored = true;
            tx
        })?;
        if !newly_stored {
            return Ok((handle, true));
        }

        self.bundle_index.insert(handle.bundle, hash, handle.is_tail());
        self.approvers.insert(handle.trunk, hash);
        if handle.trunk != handle.branch {
            self.approvers.insert(handle.branch, hash);
        }
        self.tags.insert(handle.tag, hash);
        self.addresses.insert(handle.address, hash);
        // Requested transactions are confirmed by a milestone anyway; the
        // first-seen record only feeds pruning of unconfirmed ones.
        if !requested {
            self.first_seen.insert(first_seen, hash);
        }
        debug!(tx = %hash.short_hex(), "stored transaction");

        if self.milestones.is_candidate(&handle) {
            self.try_construct_bundle(handle.retain(), false)?;
        }

        Ok((handle, false))
    }

    /// A tail transaction's ancestor set is now fully present: construct
    /// its bundle. The solidifier's guarantee makes failure to complete a
    /// fatal invariant violation, not a deferral.
    pub fn on_tail_solid(&self, tail: CacheRef<Transaction>) -> TangleResult<()> {
        self.try_construct_bundle(tail, true)
    }

    /// Transactions first seen at the given latest-milestone index.
    pub fn transactions_first_seen(&self, index: MilestoneIndex) -> Vec<TxHash> {
        self.first_seen.get(&index)
    }

    /// Transactions approving (referencing) the given hash.
    pub fn approvers_of(&self, hash: &TxHash) -> Vec<TxHash> {
        self.approvers.get(hash)
    }

    /// Transactions referencing the given address.
    pub fn transactions_for_address(&self, address: &Address) -> Vec<TxHash> {
        self.addresses.get(address)
    }

    /// Transactions carrying the given tag.
    pub fn transactions_for_tag(&self, tag: &Tag) -> Vec<TxHash> {
        self.tags.get(tag)
    }

    // ---------------------------------------------------------------
    // Bundle surface
    // ---------------------------------------------------------------

    /// Acquire a handle to the bundle stored under this tail hash.
    pub fn bundle_by_tail(&self, tail: &TxHash) -> TangleResult<Option<CacheRef<Bundle>>> {
        Ok(self.bundles.load(tail.as_bytes())?)
    }

    pub fn contains_bundle(&self, tail: &TxHash) -> TangleResult<bool> {
        Ok(self.bundles.contains(tail.as_bytes())?)
    }

    /// Remove the bundle stored under this tail hash, cached and
    /// persisted. Absent tails are a no-op.
    pub fn delete_bundle(&self, tail: &TxHash) -> TangleResult<()> {
        Ok(self.bundles.delete(tail.as_bytes())?)
    }

    /// Every stored bundle instance sharing this bundle hash. Reattaching
    /// a transfer legitimately produces several tails for one bundle hash.
    pub fn bundles_by_bundle_hash(
        &self,
        bundle_hash: &BundleHash,
    ) -> TangleResult<Vec<CacheRef<Bundle>>> {
        let mut out = Vec::new();
        for tail in self.bundle_index.tails(bundle_hash) {
            if let Some(bundle) = self.bundle_by_tail(&tail)? {
                out.push(bundle);
            }
        }
        Ok(out)
    }

    /// Every stored bundle instance containing this transaction.
    pub fn bundles_containing_transaction(
        &self,
        tx_hash: &TxHash,
    ) -> TangleResult<Vec<CacheRef<Bundle>>> {
        let Some(tx) = self.transactions.load(tx_hash.as_bytes())? else {
            return Ok(Vec::new());
        };
        if tx.is_tail() {
            return Ok(self.bundle_by_tail(tx_hash)?.into_iter().collect());
        }
        let mut out = Vec::new();
        for tail in self.tail_approvers_same_bundle(&tx.bundle, tx_hash)? {
            if let Some(bundle) = self.bundle_by_tail(&tail)? {
                out.push(bundle);
            }
        }
        Ok(out)
    }

    // ---------------------------------------------------------------
    // Construction engine
    // ---------------------------------------------------------------

    /// Every tail that transitively approves `from` within the same bundle
    /// hash, found through the approver index.
    fn tail_approvers_same_bundle(
        &self,
        bundle_hash: &BundleHash,
        from: &TxHash,
    ) -> TangleResult<Vec<TxHash>> {
        let mut tails = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(*from);
        let mut queue = VecDeque::new();
        queue.push_back(*from);

        while let Some(current) = queue.pop_front() {
            for approver in self.approvers.get(&current) {
                if !visited.insert(approver) {
                    continue;
                }
                let Some(tx) = self.transactions.load(approver.as_bytes())? else {
                    continue;
                };
                if tx.bundle != *bundle_hash {
                    continue;
                }
                if tx.is_tail() {
                    tails.push(approver);
                } else {
                    queue.push_back(approver);
                }
            }
        }
        Ok(tails)
    }

    fn try_construct_bundle(
        &self,
        tx: CacheRef<Transaction>,
        is_solid_tail: bool,
    ) -> TangleResult<()> {
        if !is_solid_tail && !tx.is_tail() {
            // Not a tail: construct for every tail that reaches this
            // transaction within the same bundle.
            for tail_hash in self.tail_approvers_same_bundle(&tx.bundle, &tx.hash)? {
                if let Some(tail) = self.transactions.load(tail_hash.as_bytes())? {
                    self.try_construct_bundle(tail, false)?;
                }
            }
            return Ok(());
        }

        let tail_hash = tx.hash;
        if self.contains_bundle(&tail_hash)? {
            return Ok(());
        }

        let mut builder = BundleBuilder::new(&tx);
        if !tx.is_head() {
            match self.walk_trunk(&mut builder, &tx)? {
                Walk::Complete => {}
                Walk::MissingTrunk => {
                    if is_solid_tail {
                        panic!(
                            "tail {tail_hash} was reported solid but a trunk ancestor \
                             is missing from the transaction store"
                        );
                    }
                    debug!(tail = %tail_hash.short_hex(), "bundle not yet constructible");
                    return Ok(());
                }
            }
        }

        self.publish(builder)
    }

    /// Walk forward along trunk links, pinning each transaction for the
    /// duration of its visit. Handles release on every exit path.
    fn walk_trunk(
        &self,
        builder: &mut BundleBuilder,
        start: &CacheRef<Transaction>,
    ) -> TangleResult<Walk> {
        let bundle_hash = start.bundle;
        let mut current: CacheRef<Transaction> = start.retain();
        loop {
            // Stop conditions: self-referencing trunk (cyclic/origin
            // transactions), declared count reached, or head reached.
            if current.hash == current.trunk || builder.is_complete() || current.is_head() {
                return Ok(Walk::Complete);
            }

            let trunk_hash = current.trunk;
            let Some(trunk) = self.transactions.load(trunk_hash.as_bytes())? else {
                return Ok(Walk::MissingTrunk);
            };

            if builder.contains(&trunk_hash) {
                current = trunk;
                continue;
            }

            if trunk.bundle != bundle_hash {
                // The chain leaves the bundle: structurally invalid, but
                // the walk is over. Validation never passes such a bundle.
                debug!(
                    tail = %builder.tail().short_hex(),
                    trunk = %trunk_hash.short_hex(),
                    "trunk leaves the bundle; stopping walk"
                );
                return Ok(Walk::Complete);
            }

            builder.add_member(&trunk);
            current = trunk;
        }
    }

    /// Publish through `compute_if_absent`, then emit events if this
    /// caller won the publication race.
    fn publish(&self, builder: BundleBuilder) -> TangleResult<()> {
        let tail_hash = builder.tail();
        let mut newly_published = false;
        let mut spent_addrs: Vec<Address> = Vec::new();
        let mut invalid_milestone: Option<String> = None;
        let mut valid_milestone: Option<MilestoneIndex> = None;

        let bundle = self.bundles.compute_if_absent(tail_hash.as_bytes(), || {
            newly_published = true;
            self.finalize(
                builder,
                &mut spent_addrs,
                &mut invalid_milestone,
                &mut valid_milestone,
            )
        })?;

        if newly_published {
            info!(
                tail = %tail_hash.short_hex(),
                members = bundle.member_count(),
                validated = bundle.is_validated(),
                "bundle published"
            );
            if let Some(reason) = invalid_milestone {
                warn!(tail = %tail_hash.short_hex(), %reason, "invalid milestone detected");
                self.events.emit(TangleEvent::InvalidMilestone {
                    tail: tail_hash,
                    reason,
                });
            }
            for address in spent_addrs {
                self.events.emit(TangleEvent::AddressSpent(address));
            }
            if let Some(index) = valid_milestone {
                info!(tail = %tail_hash.short_hex(), %index, "valid milestone");
                self.events.emit(TangleEvent::ValidMilestone {
                    tail: tail_hash,
                    index,
                });
            }
        }

        Ok(())
    }

    /// Validation, ledger changes, spent marking, and milestone hand-off.
    /// Runs exactly once per published bundle, inside the winning factory.
    fn finalize(
        &self,
        builder: BundleBuilder,
        spent_addrs: &mut Vec<Address>,
        invalid_milestone: &mut Option<String>,
        valid_milestone: &mut Option<MilestoneIndex>,
    ) -> Bundle {
        let mut flags = BundleFlags::empty();
        let mut changes: HashMap<Address, i64> = HashMap::new();

        // Pin every member for the duration of validation.
        let mut member_refs = Vec::with_capacity(builder.members().len());
        let mut all_present = true;
        for member in builder.members() {
            match self.transactions.load(member.as_bytes()) {
                Ok(Some(tx)) => member_refs.push(tx),
                Ok(None) => all_present = false,
                Err(e) => {
                    warn!(member = %member.short_hex(), error = %e, "member load failed");
                    all_present = false;
                }
            }
        }

        if builder.is_complete() && builder.has_head() && all_present {
            let members: Vec<&Transaction> = member_refs.iter().map(|r| &**r).collect();
            if balance_closed(&members) && self.validator.validate(&members) {
                flags.validated = true;
                let computed = ledger_changes(&members);
                if computed.is_empty() {
                    flags.value_spam = true;
                } else {
                    for (address, delta) in &computed {
                        if *delta < 0 {
                            if self.spent.mark(*address) {
                                debug!(address = %address.short_hex(), "newly spent address");
                            }
                            spent_addrs.push(*address);
                        }
                    }
                    changes = computed;
                }
            }
        }

        let bundle = builder.finish(flags, changes);

        if bundle.is_validated() {
            let tail = member_refs.iter().find(|r| r.hash == bundle.tail_hash());
            if let Some(tail) = tail {
                if self.milestones.is_candidate(tail) {
                    match self.milestones.check(&bundle) {
                        Ok(Some(index)) => {
                            bundle.set_milestone();
                            self.milestones.store(&bundle);
                            *valid_milestone = Some(index);
                        }
                        Ok(None) => {}
                        Err(e) => *invalid_milestone = Some(e.to_string()),
                    }
                }
            }
        }

        bundle
    }
}

impl std::fmt::Debug for Tangle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tangle")
            .field("transactions_resident", &self.transactions.len())
            .field("bundles_resident", &self.bundles.len())
            .finish()
    }
}
