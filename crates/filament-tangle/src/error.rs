use filament_store::StoreError;

/// Errors from tangle operations.
///
/// Deliberately narrow: a missing ancestor during construction is a
/// deferral, not an error, and a failing milestone check surfaces as an
/// event. What remains is the storage layer underneath.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TangleError {
    /// The object cache or its backend failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result alias for tangle operations.
pub type TangleResult<T> = Result<T, TangleError>;
