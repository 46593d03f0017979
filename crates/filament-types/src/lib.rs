//! Foundation types for Filament.
//!
//! This crate provides the condensed hash newtypes, bundle metadata flags,
//! and milestone index used throughout the Filament node. Every other
//! Filament crate depends on `filament-types`.
//!
//! # Key Types
//!
//! - [`TxHash`]: 49-byte condensed transaction hash, the identity of a transaction
//! - [`BundleHash`]: 49-byte condensed bundle hash shared by all members of a bundle
//! - [`Address`]: 49-byte condensed ledger address
//! - [`Tag`]: 17-byte condensed transaction tag
//! - [`BundleFlags`]: independently named bundle metadata booleans with a
//!   lossless one-byte bitmask form for the persisted record
//! - [`MilestoneIndex`]: ordered index of a coordinator milestone

pub mod error;
pub mod flags;
pub mod hash;
pub mod milestone;

pub use error::TypeError;
pub use flags::BundleFlags;
pub use hash::{Address, BundleHash, Tag, TxHash, HASH_LEN, TAG_LEN};
pub use milestone::MilestoneIndex;
