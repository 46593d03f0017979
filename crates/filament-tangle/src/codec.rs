//! The persisted bundle record.
//!
//! Fixed little-endian layout, sized dynamically from the two counts:
//!
//! ```text
//! offset  size   field
//! 0       1      metadata bitmask
//! 1       8      last index
//! 9       8      member count (N)
//! 17      8      ledger change count (M)
//! 25      49     bundle hash
//! 74      49     head transaction hash (null when unknown)
//! 123     49*N   member transaction hashes
//! ...     57*M   ledger changes: 49-byte address + 8-byte i64 delta
//! ```
//!
//! The tail transaction hash is the storage key and is reconstructed from
//! it, never stored in the payload. Member order and change order are not
//! significant; decode rebuilds the set and the mapping.

use std::collections::{HashMap, HashSet};

use filament_store::{Storable, StoreError, StoreResult};
use filament_types::{Address, BundleFlags, BundleHash, TxHash, HASH_LEN};

use crate::bundle::Bundle;

/// Size of the fixed header before the variable-length entries.
pub const BUNDLE_HEADER_LEN: usize = 123;

const MEMBER_ENTRY_LEN: usize = HASH_LEN;
const CHANGE_ENTRY_LEN: usize = HASH_LEN + 8;

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(arr)
}

impl Storable for Bundle {
    fn encode(&self) -> Vec<u8> {
        let members = self.members();
        let changes = self.ledger_changes();
        let mut out = Vec::with_capacity(
            BUNDLE_HEADER_LEN + members.len() * MEMBER_ENTRY_LEN + changes.len() * CHANGE_ENTRY_LEN,
        );
        out.push(self.flags().to_bits());
        out.extend_from_slice(&self.last_index().to_le_bytes());
        out.extend_from_slice(&(members.len() as u64).to_le_bytes());
        out.extend_from_slice(&(changes.len() as u64).to_le_bytes());
        out.extend_from_slice(self.bundle_hash().as_bytes());
        out.extend_from_slice(self.head_hash().unwrap_or_else(TxHash::null).as_bytes());
        for member in members {
            out.extend_from_slice(member.as_bytes());
        }
        for (address, delta) in changes {
            out.extend_from_slice(address.as_bytes());
            out.extend_from_slice(&delta.to_le_bytes());
        }
        out
    }

    fn decode(key: &[u8], bytes: &[u8]) -> StoreResult<Self> {
        let tail = TxHash::from_bytes(key).map_err(|e| StoreError::corrupt(key, e.to_string()))?;
        if bytes.len() < BUNDLE_HEADER_LEN {
            return Err(StoreError::corrupt(
                key,
                format!("record shorter than header: {} bytes", bytes.len()),
            ));
        }

        let flags =
            BundleFlags::from_bits(bytes[0]).map_err(|e| StoreError::corrupt(key, e.to_string()))?;
        let last_index = read_u64(bytes, 1);
        let member_count = read_u64(bytes, 9);
        let change_count = read_u64(bytes, 17);

        let expected = BUNDLE_HEADER_LEN as u128
            + member_count as u128 * MEMBER_ENTRY_LEN as u128
            + change_count as u128 * CHANGE_ENTRY_LEN as u128;
        if bytes.len() as u128 != expected {
            return Err(StoreError::corrupt(
                key,
                format!(
                    "length mismatch: {} bytes for {member_count} members and {change_count} changes",
                    bytes.len()
                ),
            ));
        }

        let bundle_hash = BundleHash::from_bytes(&bytes[25..74])
            .map_err(|e| StoreError::corrupt(key, e.to_string()))?;
        let head = TxHash::from_bytes(&bytes[74..123])
            .map_err(|e| StoreError::corrupt(key, e.to_string()))?;

        let mut offset = BUNDLE_HEADER_LEN;
        let mut members = HashSet::with_capacity(member_count as usize);
        for _ in 0..member_count {
            let member = TxHash::from_bytes(&bytes[offset..offset + HASH_LEN])
                .map_err(|e| StoreError::corrupt(key, e.to_string()))?;
            members.insert(member);
            offset += MEMBER_ENTRY_LEN;
        }

        let mut ledger_changes = HashMap::with_capacity(change_count as usize);
        for _ in 0..change_count {
            let address = Address::from_bytes(&bytes[offset..offset + HASH_LEN])
                .map_err(|e| StoreError::corrupt(key, e.to_string()))?;
            offset += HASH_LEN;
            let mut arr = [0u8; 8];
            arr.copy_from_slice(&bytes[offset..offset + 8]);
            ledger_changes.insert(address, i64::from_le_bytes(arr));
            offset += 8;
        }

        Ok(Bundle::from_parts(
            tail,
            head,
            bundle_hash,
            last_index,
            members,
            ledger_changes,
            flags,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::BundleBuilder;
    use crate::transaction::Transaction;
    use proptest::prelude::*;

    fn hash(byte: u8) -> TxHash {
        TxHash::from_array([byte; HASH_LEN])
    }

    fn make_bundle(member_bytes: &[u8], changes: &[(u8, i64)]) -> Bundle {
        let last = member_bytes.len() as u64 - 1;
        let tail = Transaction::new(
            hash(member_bytes[0]),
            hash(250),
            hash(251),
            BundleHash::from_array([9; HASH_LEN]),
        )
        .with_indices(0, last);
        let mut builder = BundleBuilder::new(&tail);
        for (i, &b) in member_bytes.iter().enumerate().skip(1) {
            let tx = Transaction::new(
                hash(b),
                hash(250),
                hash(251),
                BundleHash::from_array([9; HASH_LEN]),
            )
            .with_indices(i as u64, last);
            builder.add_member(&tx);
        }
        let ledger_changes = changes
            .iter()
            .map(|&(b, delta)| (Address::from_array([b; HASH_LEN]), delta))
            .collect();
        builder.finish(
            BundleFlags {
                validated: true,
                ..BundleFlags::empty()
            },
            ledger_changes,
        )
    }

    #[test]
    fn roundtrip_preserves_everything() {
        let bundle = make_bundle(&[1, 2, 3], &[(10, 5), (11, -3), (12, -2)]);
        let bytes = bundle.encode();
        assert_eq!(bytes.len(), BUNDLE_HEADER_LEN + 3 * 49 + 3 * 57);

        let decoded = Bundle::decode(bundle.tail_hash().as_bytes(), &bytes).unwrap();
        assert_eq!(decoded.tail_hash(), bundle.tail_hash());
        assert_eq!(decoded.head_hash(), bundle.head_hash());
        assert_eq!(decoded.bundle_hash(), bundle.bundle_hash());
        assert_eq!(decoded.last_index(), bundle.last_index());
        assert_eq!(decoded.members(), bundle.members());
        assert_eq!(decoded.ledger_changes(), bundle.ledger_changes());
        assert_eq!(decoded.flags(), bundle.flags());
    }

    #[test]
    fn roundtrip_with_unset_head() {
        // A mismatch-terminated walk publishes without a head.
        let tail = Transaction::new(
            hash(1),
            hash(250),
            hash(251),
            BundleHash::from_array([9; HASH_LEN]),
        )
        .with_indices(0, 4);
        let bundle = BundleBuilder::new(&tail).finish(BundleFlags::empty(), HashMap::new());
        assert_eq!(bundle.head_hash(), None);

        let decoded = Bundle::decode(bundle.tail_hash().as_bytes(), &bundle.encode()).unwrap();
        assert_eq!(decoded.head_hash(), None);
        assert!(!decoded.is_complete());
    }

    #[test]
    fn truncated_header_is_rejected() {
        let bundle = make_bundle(&[1], &[]);
        let bytes = bundle.encode();
        let err = Bundle::decode(bundle.tail_hash().as_bytes(), &bytes[..10]).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn truncated_body_is_rejected() {
        let bundle = make_bundle(&[1, 2], &[(10, 1), (11, -1)]);
        let bytes = bundle.encode();
        let err =
            Bundle::decode(bundle.tail_hash().as_bytes(), &bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let bundle = make_bundle(&[1], &[]);
        let mut bytes = bundle.encode();
        bytes.push(0);
        let err = Bundle::decode(bundle.tail_hash().as_bytes(), &bytes).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn unknown_metadata_bits_are_rejected() {
        let bundle = make_bundle(&[1], &[]);
        let mut bytes = bundle.encode();
        bytes[0] = 0xff;
        let err = Bundle::decode(bundle.tail_hash().as_bytes(), &bytes).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn absurd_counts_are_rejected_without_allocation_blowup() {
        let bundle = make_bundle(&[1], &[]);
        let mut bytes = bundle.encode();
        // Claim 2^56 members; the length check must fail first.
        bytes[9..17].copy_from_slice(&(1u64 << 56).to_le_bytes());
        let err = Bundle::decode(bundle.tail_hash().as_bytes(), &bytes).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    proptest! {
        #[test]
        fn roundtrip_property(
            member_bytes in prop::collection::hash_set(1u8..=200, 1..8),
            changes in prop::collection::hash_map(1u8..=200, -1_000_000i64..1_000_000, 0..6),
        ) {
            let members: Vec<u8> = member_bytes.into_iter().collect();
            let change_list: Vec<(u8, i64)> = changes.into_iter().collect();
            let bundle = make_bundle(&members, &change_list);
            let decoded =
                Bundle::decode(bundle.tail_hash().as_bytes(), &bundle.encode()).unwrap();
            prop_assert_eq!(decoded.members(), bundle.members());
            prop_assert_eq!(decoded.ledger_changes(), bundle.ledger_changes());
            prop_assert_eq!(decoded.last_index(), bundle.last_index());
            prop_assert_eq!(decoded.bundle_hash(), bundle.bundle_hash());
            prop_assert_eq!(decoded.head_hash(), bundle.head_hash());
        }
    }
}
