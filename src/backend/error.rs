//! Error types for the native allocation layer

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NativeError {
    /// The native allocator could not satisfy the request. Recoverable:
    /// callers fall back to another placement or surface out-of-memory.
    #[error("native allocation failed: {0}")]
    OutOfMemory(String),

    /// Operation is not available on this backend variant.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// A handle that the backend never issued, or already freed.
    #[error("invalid native handle: {0}")]
    InvalidHandle(u64),

    /// A copy or host transfer touched bytes outside an allocation.
    #[error("transfer out of bounds: {0}")]
    OutOfBounds(String),

    #[error("internal lock poisoned - this indicates a bug: {0}")]
    LockPoisoned(String),
}

impl<T> From<std::sync::PoisonError<T>> for NativeError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        NativeError::LockPoisoned(format!("Lock poisoned: {}", err))
    }
}

pub type NativeResult<T> = Result<T, NativeError>;
