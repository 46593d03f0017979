use serde::{Deserialize, Serialize};

use crate::error::TypeError;

const VALIDATED: u8 = 0b0000_0001;
const MILESTONE: u8 = 0b0000_0010;
const VALUE_SPAM: u8 = 0b0000_0100;
const KNOWN: u8 = VALIDATED | MILESTONE | VALUE_SPAM;

/// Bundle metadata as independently named booleans.
///
/// The persisted bundle record stores these as a one-byte bitmask; the
/// in-memory form keeps them as plain fields so each flag can be reasoned
/// about on its own. Conversion is lossless in both directions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleFlags {
    /// The bundle passed structural and ledger-balance validation.
    pub validated: bool,
    /// The bundle was confirmed as a coordinator milestone.
    pub milestone: bool,
    /// The bundle is a net-zero transfer with no ledger changes.
    pub value_spam: bool,
}

impl BundleFlags {
    /// Flags of a freshly constructed, unvalidated bundle.
    pub const fn empty() -> Self {
        Self {
            validated: false,
            milestone: false,
            value_spam: false,
        }
    }

    /// Pack into the one-byte bitmask used by the persisted record.
    pub fn to_bits(self) -> u8 {
        let mut bits = 0;
        if self.validated {
            bits |= VALIDATED;
        }
        if self.milestone {
            bits |= MILESTONE;
        }
        if self.value_spam {
            bits |= VALUE_SPAM;
        }
        bits
    }

    /// Unpack from a bitmask known to contain only valid bits, dropping
    /// anything else. For in-memory flag words this crate wrote itself;
    /// persisted input goes through [`BundleFlags::from_bits`].
    pub fn from_bits_truncate(bits: u8) -> Self {
        Self {
            validated: bits & VALIDATED != 0,
            milestone: bits & MILESTONE != 0,
            value_spam: bits & VALUE_SPAM != 0,
        }
    }

    /// Unpack from the persisted bitmask.
    ///
    /// Unknown bits mean the record was written by something this version
    /// does not understand; that is treated as corruption, not ignored.
    pub fn from_bits(bits: u8) -> Result<Self, TypeError> {
        if bits & !KNOWN != 0 {
            return Err(TypeError::UnknownFlagBits(bits));
        }
        Ok(Self {
            validated: bits & VALIDATED != 0,
            milestone: bits & MILESTONE != 0,
            value_spam: bits & VALUE_SPAM != 0,
        })
    }
}
