use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordered index of a coordinator milestone.
///
/// Milestone indices increase by one per issued milestone and order the
/// confirmation history of the tangle.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MilestoneIndex(pub u32);

impl MilestoneIndex {
    /// The index "before the first milestone".
    pub const ZERO: Self = Self(0);

    /// The following milestone index.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for MilestoneIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for MilestoneIndex {
    fn from(value: u32) -> Self {
        Self(value)
    }
}
