//! Error types for the routing store

use thiserror::Error;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors returned by storage operations
///
/// Under normal operation none of the storage calls fail. These variants
/// cover internal invariant violations and misconfiguration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// An in-flight counter would leave the `i64` range
    #[error("in-flight counter for {key:?} overflowed applying delta {delta}")]
    CounterOverflow { key: String, delta: i64 },

    /// The configured storage backend is not available in this build
    #[error("unsupported storage backend: {0}")]
    UnsupportedBackend(String),
}
