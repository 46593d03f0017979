use crate::error::StoreResult;

/// Contract for entity kinds held by an [`ObjectCache`].
///
/// Implementations own their persisted record layout. The storage key is
/// passed to [`decode`] so that fields which double as the key (for
/// example, a bundle's tail transaction hash) can be reconstructed without
/// being stored in the payload.
///
/// Objects are establish-once: the cache never rewrites a record after the
/// initial write-through, so `encode` is called exactly once per stored
/// object.
///
/// [`ObjectCache`]: crate::cache::ObjectCache
/// [`decode`]: Storable::decode
pub trait Storable: Send + Sync + Sized + 'static {
    /// Serialize into the persisted record form.
    fn encode(&self) -> Vec<u8>;

    /// Reconstruct from the storage key (without the cache's key-space
    /// prefix) and the persisted record bytes.
    ///
    /// Truncated or otherwise malformed input must fail with
    /// [`StoreError::Corrupt`]; partial recovery is never attempted.
    ///
    /// [`StoreError::Corrupt`]: crate::error::StoreError::Corrupt
    fn decode(key: &[u8], bytes: &[u8]) -> StoreResult<Self>;
}
