//! The transaction entity and its persisted record.
//!
//! Transactions arrive individually verified from the gossip layer; this
//! crate consumes them, it does not create or sign them. The persisted
//! record is a fixed little-endian layout with the transaction hash kept
//! out of the payload, since it is the storage key.

use std::sync::atomic::{AtomicBool, Ordering};

use filament_store::{Storable, StoreError, StoreResult};
use filament_types::{Address, BundleHash, Tag, TxHash, HASH_LEN, TAG_LEN};

/// Fixed size of the persisted transaction record.
///
/// ```text
/// offset  size  field
/// 0       49    trunk
/// 49      49    branch
/// 98      49    bundle hash
/// 147     49    address
/// 196     17    tag
/// 213     8     value (i64)
/// 221     8     current index
/// 229     8     last index
/// 237     8     timestamp
/// 245     8     attachment timestamp
/// 253     1     flags (bit 0: solid)
/// ```
pub const TX_RECORD_LEN: usize = 254;

const FLAG_SOLID: u8 = 0b0000_0001;

/// A single verified transaction of the tangle.
///
/// Everything except the solidity flag is immutable. Solidity is decided by
/// an external solidifier and flips from `false` to `true` at most once; it
/// is an atomic so every holder of a cached handle observes the change.
#[derive(Debug)]
pub struct Transaction {
    pub hash: TxHash,
    pub trunk: TxHash,
    pub branch: TxHash,
    pub bundle: BundleHash,
    pub address: Address,
    pub tag: Tag,
    pub value: i64,
    pub current_index: u64,
    pub last_index: u64,
    pub timestamp: u64,
    pub attachment_timestamp: u64,
    solid: AtomicBool,
}

impl Transaction {
    /// Create a transaction with the graph references set and everything
    /// else zeroed; chain the `with_*` builders for the rest.
    pub fn new(hash: TxHash, trunk: TxHash, branch: TxHash, bundle: BundleHash) -> Self {
        Self {
            hash,
            trunk,
            branch,
            bundle,
            address: Address::null(),
            tag: Tag::null(),
            value: 0,
            current_index: 0,
            last_index: 0,
            timestamp: 0,
            attachment_timestamp: 0,
            solid: AtomicBool::new(false),
        }
    }

    pub fn with_address(mut self, address: Address) -> Self {
        self.address = address;
        self
    }

    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag = tag;
        self
    }

    pub fn with_value(mut self, value: i64) -> Self {
        self.value = value;
        self
    }

    pub fn with_indices(mut self, current: u64, last: u64) -> Self {
        self.current_index = current;
        self.last_index = last;
        self
    }

    pub fn with_timestamps(mut self, timestamp: u64, attachment: u64) -> Self {
        self.timestamp = timestamp;
        self.attachment_timestamp = attachment;
        self
    }

    /// First transaction of its bundle (current index 0).
    pub fn is_tail(&self) -> bool {
        self.current_index == 0
    }

    /// Last transaction of its bundle (current index == last index).
    pub fn is_head(&self) -> bool {
        self.current_index == self.last_index
    }

    /// Whether every transitive ancestor is present in local storage.
    pub fn is_solid(&self) -> bool {
        self.solid.load(Ordering::Acquire)
    }

    /// Record that the external solidifier found all ancestors present.
    pub fn mark_solid(&self) {
        self.solid.store(true, Ordering::Release);
    }
}

fn read_hash(key: &[u8], bytes: &[u8], offset: usize) -> StoreResult<TxHash> {
    TxHash::from_bytes(&bytes[offset..offset + HASH_LEN])
        .map_err(|e| StoreError::corrupt(key, e.to_string()))
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(arr)
}

fn read_i64(bytes: &[u8], offset: usize) -> i64 {
    read_u64(bytes, offset) as i64
}

impl Storable for Transaction {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TX_RECORD_LEN);
        out.extend_from_slice(self.trunk.as_bytes());
        out.extend_from_slice(self.branch.as_bytes());
        out.extend_from_slice(self.bundle.as_bytes());
        out.extend_from_slice(self.address.as_bytes());
        out.extend_from_slice(self.tag.as_bytes());
        out.extend_from_slice(&self.value.to_le_bytes());
        out.extend_from_slice(&self.current_index.to_le_bytes());
        out.extend_from_slice(&self.last_index.to_le_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.attachment_timestamp.to_le_bytes());
        out.push(if self.is_solid() { FLAG_SOLID } else { 0 });
        out
    }

    fn decode(key: &[u8], bytes: &[u8]) -> StoreResult<Self> {
        if bytes.len() != TX_RECORD_LEN {
            return Err(StoreError::corrupt(
                key,
                format!("expected {TX_RECORD_LEN} bytes, got {}", bytes.len()),
            ));
        }
        let hash = TxHash::from_bytes(key).map_err(|e| StoreError::corrupt(key, e.to_string()))?;
        let trunk = read_hash(key, bytes, 0)?;
        let branch = read_hash(key, bytes, 49)?;
        let bundle = BundleHash::from_bytes(&bytes[98..98 + HASH_LEN])
            .map_err(|e| StoreError::corrupt(key, e.to_string()))?;
        let address = Address::from_bytes(&bytes[147..147 + HASH_LEN])
            .map_err(|e| StoreError::corrupt(key, e.to_string()))?;
        let tag = Tag::from_bytes(&bytes[196..196 + TAG_LEN])
            .map_err(|e| StoreError::corrupt(key, e.to_string()))?;
        let flags = bytes[253];
        if flags & !FLAG_SOLID != 0 {
            return Err(StoreError::corrupt(
                key,
                format!("unknown transaction flag bits: {flags:#04x}"),
            ));
        }
        Ok(Self {
            hash,
            trunk,
            branch,
            bundle,
            address,
            tag,
            value: read_i64(bytes, 213),
            current_index: read_u64(bytes, 221),
            last_index: read_u64(bytes, 229),
            timestamp: read_u64(bytes, 237),
            attachment_timestamp: read_u64(bytes, 245),
            solid: AtomicBool::new(flags & FLAG_SOLID != 0),
        })
    }
}
