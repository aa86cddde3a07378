//! Boundary error taxonomy.
//!
//! Every public engine operation returns [`EngineError`] on failure. The
//! variants are stable kinds: callers can match on them without caring about
//! the underlying storage or extraction detail, which travels in the context
//! string.

use crate::storage::StorageError;

/// Stable error kinds surfaced at the engine boundary.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A brain, fiber, neuron, or synapse does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Input failed schema or field validation. Nothing was persisted.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// A version or constraint conflict that survived retries.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Contention beyond the retry budget.
    #[error("busy: {0}")]
    Busy(String),

    /// Storage integrity failure or internal invariant violation.
    /// The brain is marked unhealthy; writes are refused until rechecked.
    #[error("internal: {0}")]
    Internal(String),
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => EngineError::NotFound(what),
            StorageError::Busy(what) => EngineError::Busy(what),
            other => EngineError::Internal(other.to_string()),
        }
    }
}

/// Result alias for engine-boundary operations.
pub type Result<T> = std::result::Result<T, EngineError>;
