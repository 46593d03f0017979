/// Errors from storage operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The persistent backend failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// A persisted record could not be decoded. Fatal for that record;
    /// no partial recovery is attempted.
    #[error("corrupt record under key {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StoreError {
    /// Build a [`StoreError::Corrupt`] for the given raw key.
    pub fn corrupt(key: &[u8], reason: impl Into<String>) -> Self {
        Self::Corrupt {
            key: hex::encode(key),
            reason: reason.into(),
        }
    }
}

/// Result alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;
