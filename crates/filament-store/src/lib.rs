//! Ledger object storage for Filament.
//!
//! This crate provides the two storage layers everything above it builds on:
//!
//! - [`KvStore`]: the byte-keyed persistent backend boundary, with
//!   [`MemoryKv`] for tests and embedding
//! - [`ObjectCache`]: a generic, reference-counted, key-addressed cache
//!   over a [`KvStore`], instantiated per entity kind (transactions,
//!   bundles) under a reserved one-byte key-space prefix
//!
//! # Handle Discipline
//!
//! Acquiring an object from the cache returns a [`CacheRef`], an ownership
//! guard that pins the object in memory. The live-reference count goes up
//! on acquisition and [`CacheRef::retain`], and down when a guard drops,
//! on every exit path including early returns. An entry becomes eligible
//! for eviction only once its count is zero and the configured residency
//! time has elapsed; it stays durably available through the backend either
//! way.
//!
//! # Atomicity
//!
//! [`ObjectCache::compute_if_absent`] is the single atomicity primitive:
//! among all callers racing on one key, exactly one factory runs, its
//! result is written through to the backend, and every racer receives a
//! handle to the same published object. There is no global lock; keys are
//! striped across shards and serialized per key.

pub mod cache;
pub mod error;
pub mod kv;
pub mod storable;

pub use cache::{CacheConfig, CacheRef, LeakDetectionConfig, LeakInfo, ObjectCache};
pub use error::{StoreError, StoreResult};
pub use kv::{KvStore, MemoryKv};
pub use storable::Storable;
