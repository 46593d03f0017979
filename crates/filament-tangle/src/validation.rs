//! Bundle validation and ledger-change computation.
//!
//! The minimal built-in contract is ledger-balance closure: the member
//! values of a bundle must sum to zero. Further structural rules
//! (signature fragment validity, address reuse policy) are a deployment
//! concern and plug in through [`BundleValidator`].

use std::collections::HashMap;

use filament_types::Address;

use crate::transaction::Transaction;

/// Pluggable structural rules applied after balance closure.
pub trait BundleValidator: Send + Sync {
    /// `true` if the complete, balance-closed member set also satisfies
    /// these rules. Members carry no particular order.
    fn validate(&self, members: &[&Transaction]) -> bool;
}

/// Validator with no rules beyond balance closure.
#[derive(Debug, Default)]
pub struct NoExtraRules;

impl BundleValidator for NoExtraRules {
    fn validate(&self, _members: &[&Transaction]) -> bool {
        true
    }
}

/// Whether the member values sum to zero.
///
/// Uses a wide accumulator: each value fits i64, but a hostile bundle
/// could sum past it.
pub fn balance_closed(members: &[&Transaction]) -> bool {
    members.iter().map(|tx| tx.value as i128).sum::<i128>() == 0
}

/// Per-address net value deltas, zero entries dropped.
///
/// An empty result for a balance-closed bundle means the transfer moved
/// nothing: value-spam.
pub fn ledger_changes(members: &[&Transaction]) -> HashMap<Address, i64> {
    let mut changes: HashMap<Address, i64> = HashMap::new();
    for tx in members {
        *changes.entry(tx.address).or_insert(0) += tx.value;
    }
    changes.retain(|_, delta| *delta != 0);
    changes
}
