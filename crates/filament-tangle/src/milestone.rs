//! Milestone subsystem boundary.
//!
//! Milestones are trusted coordinator bundles; their signature scheme and
//! persistence live outside this crate. The construction engine only needs
//! a candidate predicate, a verification call, and a store hook.

use filament_types::MilestoneIndex;

use crate::bundle::Bundle;
use crate::transaction::Transaction;

/// A milestone verification failure.
///
/// Non-fatal for bundle publication; it surfaces as an invalid-milestone
/// event and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("milestone check failed: {0}")]
pub struct MilestoneError(pub String);

/// External milestone checker and store.
pub trait MilestoneProvider: Send + Sync {
    /// Cheap screen: might this transaction belong to a milestone bundle?
    /// Allowed to over-approximate; [`check`] decides.
    ///
    /// [`check`]: MilestoneProvider::check
    fn is_candidate(&self, tx: &Transaction) -> bool;

    /// Full verification of a constructed bundle. `Ok(None)` means "not a
    /// milestone", `Ok(Some(index))` a confirmed milestone at that index.
    fn check(&self, bundle: &Bundle) -> Result<Option<MilestoneIndex>, MilestoneError>;

    /// Persist a confirmed milestone.
    fn store(&self, bundle: &Bundle);
}

/// Provider for nodes running without a coordinator: nothing is ever a
/// milestone candidate.
#[derive(Debug, Default)]
pub struct NoMilestones;

impl MilestoneProvider for NoMilestones {
    fn is_candidate(&self, _tx: &Transaction) -> bool {
        false
    }

    fn check(&self, _bundle: &Bundle) -> Result<Option<MilestoneIndex>, MilestoneError> {
        Ok(None)
    }

    fn store(&self, _bundle: &Bundle) {}
}
