//! The reference-counted ledger object cache.
//!
//! [`ObjectCache`] fronts a [`KvStore`] with an in-memory, key-striped map
//! of live objects. Every acquisition returns a [`CacheRef`] guard; the
//! guard's drop is the release, so the +1/-1 discipline holds on every exit
//! path by construction.
//!
//! Per-key serialization comes from a slot lock inside the sharded map:
//! [`ObjectCache::compute_if_absent`] runs its factory under the slot lock,
//! so racing callers block until the winner has published and then share
//! its result. There is no global lock.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::StoreResult;
use crate::kv::KvStore;
use crate::storable::Storable;

/// Tuning for a single [`ObjectCache`] instance.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Number of key stripes. More stripes, less lock contention.
    pub shard_count: usize,
    /// How long a fully released entry stays resident before eviction.
    pub cache_time: Duration,
    /// Optional leak diagnostics. Never affects correctness.
    pub leak_detection: Option<LeakDetectionConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            shard_count: 16,
            cache_time: Duration::from_secs(5),
            leak_detection: None,
        }
    }
}

/// Thresholds for flagging suspicious handle usage.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LeakDetectionConfig {
    /// Flag objects with more outstanding handles than this.
    pub max_handles_per_object: usize,
    /// Flag objects that have been continuously referenced longer than this.
    pub max_hold_time: Duration,
}

impl Default for LeakDetectionConfig {
    fn default() -> Self {
        Self {
            max_handles_per_object: 20,
            max_hold_time: Duration::from_secs(100),
        }
    }
}

/// One diagnostic row of [`ObjectCache::leak_report`].
#[derive(Clone, Debug)]
pub struct LeakInfo {
    /// Storage key of the live object (without the key-space prefix).
    pub key: Vec<u8>,
    /// Outstanding handle count.
    pub live_handles: usize,
    /// How long the object has been continuously referenced.
    pub held_for: Duration,
    /// Whether a configured threshold is exceeded.
    pub flagged: bool,
}

/// Per-key cache entry. The `value` mutex doubles as the single-flight
/// latch: whoever holds it while the value is `None` is the sole fetcher
/// or factory runner for this key.
struct Slot<T> {
    value: Mutex<Option<Arc<T>>>,
    refs: AtomicUsize,
    /// Millis since the cache epoch at which the refcount last hit zero.
    /// Zero means "currently referenced or never acquired".
    released_at_ms: AtomicU64,
    /// Millis since the cache epoch at which the refcount last left zero.
    /// Zero means "not currently referenced".
    held_since_ms: AtomicU64,
    epoch: Instant,
}

impl<T> Slot<T> {
    fn new(epoch: Instant) -> Self {
        Self {
            value: Mutex::new(None),
            refs: AtomicUsize::new(0),
            released_at_ms: AtomicU64::new(0),
            held_since_ms: AtomicU64::new(0),
            epoch,
        }
    }

    /// Millis since the epoch, offset by one so that zero stays "unset".
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64 + 1
    }

    fn acquire(&self) {
        if self.refs.fetch_add(1, Ordering::AcqRel) == 0 {
            self.released_at_ms.store(0, Ordering::Release);
            self.held_since_ms.store(self.now_ms(), Ordering::Release);
        }
    }

    fn release(&self) {
        if self.refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.held_since_ms.store(0, Ordering::Release);
            self.released_at_ms.store(self.now_ms(), Ordering::Release);
        }
    }
}

/// Borrowed, reference-counted view of a cached object.
///
/// A `CacheRef` pins its target in memory for as long as it lives. It is an
/// exclusive ownership guard: there is no copy, and the release happens in
/// `Drop` on every exit path. Use [`CacheRef::retain`] to hand an extra
/// reference to another owner.
pub struct CacheRef<T: Storable> {
    object: Arc<T>,
    slot: Arc<Slot<T>>,
}

impl<T: Storable> CacheRef<T> {
    /// Wrap an already-incremented slot.
    fn new(object: Arc<T>, slot: Arc<Slot<T>>) -> Self {
        Self { object, slot }
    }

    /// Acquire an additional handle to the same object (+1).
    pub fn retain(&self) -> CacheRef<T> {
        self.slot.acquire();
        CacheRef {
            object: Arc::clone(&self.object),
            slot: Arc::clone(&self.slot),
        }
    }

    /// Outstanding handle count for the underlying object, this one
    /// included. Diagnostic.
    pub fn live_handles(&self) -> usize {
        self.slot.refs.load(Ordering::Acquire)
    }
}

impl<T: Storable> Deref for CacheRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.object
    }
}

impl<T: Storable> Drop for CacheRef<T> {
    fn drop(&mut self) {
        self.slot.release();
    }
}

impl<T: Storable + std::fmt::Debug> std::fmt::Debug for CacheRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CacheRef").field(&self.object).finish()
    }
}

/// Generic, reference-counted, key-addressed cache over a [`KvStore`].
///
/// One instance per entity kind, each under its own reserved one-byte
/// key-space prefix. New objects enter exclusively through
/// [`compute_if_absent`], which writes them through to the backend before
/// any handle escapes; there is no update path, so published objects are
/// establish-once, read-many.
///
/// [`compute_if_absent`]: ObjectCache::compute_if_absent
pub struct ObjectCache<T: Storable> {
    kv: Arc<dyn KvStore>,
    prefix: u8,
    shards: Vec<Mutex<HashMap<Vec<u8>, Arc<Slot<T>>>>>,
    cache_time: Duration,
    leak: Option<LeakDetectionConfig>,
    epoch: Instant,
}

impl<T: Storable> ObjectCache<T> {
    /// Create a cache over `kv`, owning the key space under `prefix`.
    pub fn new(kv: Arc<dyn KvStore>, prefix: u8, config: CacheConfig) -> Self {
        let shard_count = config.shard_count.max(1);
        let shards = (0..shard_count)
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self {
            kv,
            prefix,
            shards,
            cache_time: config.cache_time,
            leak: config.leak_detection,
            epoch: Instant::now(),
        }
    }

    fn storage_key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(key.len() + 1);
        full.push(self.prefix);
        full.extend_from_slice(key);
        full
    }

    fn shard(&self, key: &[u8]) -> &Mutex<HashMap<Vec<u8>, Arc<Slot<T>>>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    /// Get or insert the slot for `key`. The shard lock is held only for
    /// the map access, never across backend I/O or a factory.
    fn slot_for(&self, key: &[u8]) -> Arc<Slot<T>> {
        let mut map = self.shard(key).lock().expect("lock poisoned");
        Arc::clone(
            map.entry(key.to_vec())
                .or_insert_with(|| Arc::new(Slot::new(self.epoch))),
        )
    }

    /// Remove a still-empty slot this caller inserted. Called with the slot
    /// value lock held and the value `None`, so no handle can exist yet.
    fn discard_placeholder(&self, key: &[u8], slot: &Arc<Slot<T>>) {
        let mut map = self.shard(key).lock().expect("lock poisoned");
        if let Some(existing) = map.get(key) {
            if Arc::ptr_eq(existing, slot) {
                map.remove(key);
            }
        }
    }

    /// Acquire-or-fetch: a handle to the cached or persisted object under
    /// `key`, or `None` if neither exists.
    pub fn load(&self, key: &[u8]) -> StoreResult<Option<CacheRef<T>>> {
        let slot = self.slot_for(key);
        let mut value = slot.value.lock().expect("lock poisoned");
        if let Some(object) = value.as_ref() {
            slot.acquire();
            return Ok(Some(CacheRef::new(Arc::clone(object), Arc::clone(&slot))));
        }

        let bytes = match self.kv.get(&self.storage_key(key)) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.discard_placeholder(key, &slot);
                return Ok(None);
            }
            Err(e) => {
                self.discard_placeholder(key, &slot);
                return Err(e);
            }
        };
        let object = match T::decode(key, &bytes) {
            Ok(object) => Arc::new(object),
            Err(e) => {
                self.discard_placeholder(key, &slot);
                return Err(e);
            }
        };
        *value = Some(Arc::clone(&object));
        slot.acquire();
        Ok(Some(CacheRef::new(object, Arc::clone(&slot))))
    }

    /// Existence check without acquiring a handle.
    pub fn contains(&self, key: &[u8]) -> StoreResult<bool> {
        let slot = {
            let map = self.shard(key).lock().expect("lock poisoned");
            map.get(key).cloned()
        };
        if let Some(slot) = slot {
            if slot.value.lock().expect("lock poisoned").is_some() {
                return Ok(true);
            }
        }
        self.kv.contains(&self.storage_key(key))
    }

    /// Remove both the cached and the persisted copy. Absent keys are a
    /// no-op. Outstanding handles stay valid; they just no longer pin a
    /// cache entry.
    pub fn delete(&self, key: &[u8]) -> StoreResult<()> {
        {
            let mut map = self.shard(key).lock().expect("lock poisoned");
            map.remove(key);
        }
        self.kv.delete(&self.storage_key(key))
    }

    /// Atomic compute-if-absent, the single publication primitive.
    ///
    /// If an object exists under `key`, cached or persisted, a handle to
    /// it is returned and `factory` never runs. Otherwise exactly one of
    /// the callers racing on `key` runs its factory under the per-key slot
    /// lock; the result is written through to the backend and every racer
    /// receives a handle to the same published object.
    pub fn compute_if_absent(
        &self,
        key: &[u8],
        factory: impl FnOnce() -> T,
    ) -> StoreResult<CacheRef<T>> {
        let slot = self.slot_for(key);
        let mut value = slot.value.lock().expect("lock poisoned");
        if let Some(object) = value.as_ref() {
            slot.acquire();
            return Ok(CacheRef::new(Arc::clone(object), Arc::clone(&slot)));
        }

        let object = match self.kv.get(&self.storage_key(key)) {
            Ok(Some(bytes)) => match T::decode(key, &bytes) {
                Ok(object) => Arc::new(object),
                Err(e) => {
                    self.discard_placeholder(key, &slot);
                    return Err(e);
                }
            },
            Ok(None) => {
                let object = Arc::new(factory());
                if let Err(e) = self.kv.put(&self.storage_key(key), &object.encode()) {
                    self.discard_placeholder(key, &slot);
                    return Err(e);
                }
                debug!(key = %hex::encode(key), "published new object");
                object
            }
            Err(e) => {
                self.discard_placeholder(key, &slot);
                return Err(e);
            }
        };
        *value = Some(Arc::clone(&object));
        slot.acquire();
        Ok(CacheRef::new(object, Arc::clone(&slot)))
    }

    /// Number of entries currently resident in memory. Diagnostic.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().expect("lock poisoned").len())
            .sum()
    }

    /// Returns `true` if no entries are resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict entries whose refcount is zero and whose residency time has
    /// elapsed. Returns the number of entries dropped from memory; their
    /// persisted copies are untouched.
    ///
    /// Never removes an entry with a positive handle count: the refcount
    /// transitions 0 -> 1 only under the slot value lock, which this takes
    /// non-blockingly before deciding.
    pub fn evict_released(&self) -> usize {
        let cache_time_ms = self.cache_time.as_millis() as u64;
        let mut evicted = 0;
        for shard in &self.shards {
            let mut map = shard.lock().expect("lock poisoned");
            map.retain(|_, slot| {
                if slot.refs.load(Ordering::Acquire) != 0 {
                    return true;
                }
                // A load/compute may be mid-flight on this slot; skip it
                // rather than block the shard.
                let Ok(value) = slot.value.try_lock() else {
                    return true;
                };
                if slot.refs.load(Ordering::Acquire) != 0 {
                    return true;
                }
                if value.is_none() {
                    // Placeholder left behind by an aborted fetch.
                    evicted += 1;
                    return false;
                }
                let released = slot.released_at_ms.load(Ordering::Acquire);
                if released != 0 && slot.now_ms().saturating_sub(released) >= cache_time_ms {
                    evicted += 1;
                    false
                } else {
                    true
                }
            });
        }
        if evicted > 0 {
            debug!(evicted, resident = self.len(), "evicted released entries");
        }
        evicted
    }

    /// Outstanding-handle diagnostics for every currently referenced
    /// entry. Entries exceeding the configured [`LeakDetectionConfig`]
    /// thresholds are flagged; with leak detection unconfigured nothing is
    /// flagged. Purely diagnostic.
    pub fn leak_report(&self) -> Vec<LeakInfo> {
        let mut report = Vec::new();
        for shard in &self.shards {
            let entries: Vec<(Vec<u8>, Arc<Slot<T>>)> = {
                let map = shard.lock().expect("lock poisoned");
                map.iter()
                    .map(|(k, s)| (k.clone(), Arc::clone(s)))
                    .collect()
            };
            for (key, slot) in entries {
                let live_handles = slot.refs.load(Ordering::Acquire);
                if live_handles == 0 {
                    continue;
                }
                let held_since = slot.held_since_ms.load(Ordering::Acquire);
                let held_for = if held_since == 0 {
                    Duration::ZERO
                } else {
                    Duration::from_millis(slot.now_ms().saturating_sub(held_since))
                };
                let flagged = self.leak.as_ref().is_some_and(|cfg| {
                    live_handles > cfg.max_handles_per_object || held_for > cfg.max_hold_time
                });
                report.push(LeakInfo {
                    key,
                    live_handles,
                    held_for,
                    flagged,
                });
            }
        }
        report
    }

    /// Background maintenance loop: periodic eviction plus leak warnings.
    ///
    /// Runs forever; spawn it on the runtime and abort the task on
    /// shutdown. Request paths never wait on this.
    pub async fn run_evictor(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.evict_released();
            if self.leak.is_some() {
                for leak in self.leak_report() {
                    if leak.flagged {
                        warn!(
                            key = %hex::encode(&leak.key),
                            handles = leak.live_handles,
                            held_for_ms = leak.held_for.as_millis() as u64,
                            "possible handle leak"
                        );
                    }
                }
            }
        }
    }
}

impl<T: Storable> std::fmt::Debug for ObjectCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCache")
            .field("prefix", &self.prefix)
            .field("resident", &self.len())
            .finish()
    }
}
