//! Tangle storage layer: transactions, bundles, and the construction
//! engine that assembles bundles from solid tails.
//!
//! The entry point is [`Tangle`], built over any [`filament_store::KvStore`]
//! with a [`MilestoneProvider`] and a [`BundleValidator`]. Transactions go
//! in through [`Tangle::ingest_transaction`]; the solidifier reports tails
//! through [`Tangle::on_tail_solid`]; bundles come back out through the
//! tail-keyed query surface. Publication outcomes are broadcast as
//! [`TangleEvent`]s.

pub mod bundle;
pub mod codec;
pub mod error;
pub mod event;
pub mod index;
pub mod milestone;
pub mod spent;
pub mod tangle;
pub mod transaction;
pub mod validation;

pub use bundle::Bundle;
pub use error::{TangleError, TangleResult};
pub use event::{EventBus, TangleEvent};
pub use index::{AddressIndex, ApproverIndex, BundleIndex, FirstSeenIndex, TagIndex, TxIndex};
pub use milestone::{MilestoneError, MilestoneProvider, NoMilestones};
pub use spent::SpentAddresses;
pub use tangle::{Tangle, TangleConfig, BUNDLE_KEYSPACE, TX_KEYSPACE};
pub use transaction::Transaction;
pub use validation::{balance_closed, ledger_changes, BundleValidator, NoExtraRules};
