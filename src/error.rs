//! Unified error handling for memforge
//!
//! This module provides a centralized error type that consolidates the
//! domain-specific errors of the backend and memory layers with the
//! device-level failures. It implements error categorization for:
//! - User errors (bad configuration or arguments, actionable by callers)
//! - Recoverable errors (memory pressure, capacity limits)
//! - Backend errors (native allocator / device failures)
//! - Internal errors (bugs, poisoned locks)

use std::fmt;

use crate::backend::NativeError;
use crate::memory::MemoryError;

/// Unified error type for memforge
///
/// Device-level operations return this type; the backend and memory layers
/// keep their own error enums and convert on the way up. Categorization via
/// [`MemForgeError::category`] drives fallback decisions (e.g. retry with
/// remote placement on a recoverable allocation failure).
#[derive(Debug, thiserror::Error)]
pub enum MemForgeError {
    // ========== Backend Errors ==========
    /// Native allocator or device primitive failed
    #[error("native backend error: {0}")]
    Native(#[from] NativeError),

    // ========== Memory Errors ==========
    /// Heap, cache, view, or address-map failure
    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    // ========== Device Errors ==========
    /// Queue handle does not belong to this device or was destroyed
    #[error("unknown queue: {0}")]
    UnknownQueue(usize),

    /// Scratch store growth failed; previous scratch state is intact
    #[error("scratch allocation failed: {0}")]
    ScratchAllocationFailed(String),

    /// Invalid device configuration
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ========== Internal Errors ==========
    /// Internal error (indicates a bug)
    #[error("internal error: {0}")]
    Internal(String),

    /// Lock poisoned (indicates a bug or concurrent access issue)
    #[error("internal lock poisoned: {0}")]
    LockPoisoned(String),
}

impl MemForgeError {
    /// Categorize the error for handling decisions
    ///
    /// Returns the error category, which can be used to determine whether an
    /// error is recoverable, user-facing, or internal.
    pub fn category(&self) -> ErrorCategory {
        match self {
            MemForgeError::Native(NativeError::OutOfMemory(_))
            | MemForgeError::Memory(MemoryError::Native(NativeError::OutOfMemory(_)))
            | MemForgeError::Memory(MemoryError::HeapExhausted { .. })
            | MemForgeError::Memory(MemoryError::HeapReallocFailed(_))
            | MemForgeError::ScratchAllocationFailed(_) => ErrorCategory::Recoverable,

            MemForgeError::Native(_) => ErrorCategory::Backend,

            MemForgeError::UnknownQueue(_)
            | MemForgeError::InvalidConfiguration(_)
            | MemForgeError::Memory(MemoryError::ViewOutOfBounds { .. }) => ErrorCategory::User,

            MemForgeError::Memory(MemoryError::VaRangeOverlap { .. })
            | MemForgeError::Memory(MemoryError::LockPoisoned(_))
            | MemForgeError::Memory(MemoryError::Native(_))
            | MemForgeError::Internal(_)
            | MemForgeError::LockPoisoned(_) => ErrorCategory::Internal,
        }
    }

    /// Check if this error is recoverable (the caller has a fallback)
    ///
    /// Recoverable errors are memory-pressure conditions: the caller may
    /// retry with a different placement, trim caches, or surface
    /// out-of-memory to the invoking operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Recoverable)
    }

    /// Check if this is a user-facing error (actionable by the caller)
    pub fn is_user_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::User)
    }

    /// Check if this is an internal error (indicates a bug)
    pub fn is_internal_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Internal)
    }
}

/// Error category for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// User error - invalid argument or configuration
    User,
    /// Recoverable error - memory pressure, apply a fallback
    Recoverable,
    /// Internal error - indicates a bug
    Internal,
    /// Backend error - native device failure
    Backend,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::User => write!(f, "User"),
            ErrorCategory::Recoverable => write!(f, "Recoverable"),
            ErrorCategory::Internal => write!(f, "Internal"),
            ErrorCategory::Backend => write!(f, "Backend"),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for MemForgeError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        MemForgeError::LockPoisoned(err.to_string())
    }
}

/// Helper type alias for Results using MemForgeError
pub type MemResult<T> = std::result::Result<T, MemForgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            MemForgeError::Native(NativeError::OutOfMemory("vram".into())).category(),
            ErrorCategory::Recoverable
        );
        assert_eq!(
            MemForgeError::Memory(MemoryError::HeapExhausted {
                needed: 4096,
                largest_free: 1024,
            })
            .category(),
            ErrorCategory::Recoverable
        );
        assert_eq!(
            MemForgeError::Native(NativeError::Unsupported("offline")).category(),
            ErrorCategory::Backend
        );
        assert_eq!(
            MemForgeError::UnknownQueue(3).category(),
            ErrorCategory::User
        );
        assert_eq!(
            MemForgeError::LockPoisoned("heap".into()).category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn test_is_recoverable() {
        assert!(MemForgeError::ScratchAllocationFailed("oom".into()).is_recoverable());
        assert!(!MemForgeError::Internal("bug".into()).is_recoverable());
        assert!(!MemForgeError::InvalidConfiguration("bad".into()).is_recoverable());
    }

    #[test]
    fn test_memory_error_conversion() {
        let err: MemForgeError = MemoryError::ViewOutOfBounds {
            offset: 10,
            len: 20,
            size: 16,
        }
        .into();
        assert!(err.is_user_error());
    }

    #[test]
    fn test_poison_error_conversion() {
        use std::sync::PoisonError;

        fn convert<T>(err: PoisonError<T>) -> MemForgeError {
            MemForgeError::from(err)
        }
        let _ = convert::<i32> as fn(PoisonError<i32>) -> MemForgeError;
    }

    #[test]
    fn test_error_display() {
        let err = MemForgeError::UnknownQueue(7);
        assert_eq!(err.to_string(), "unknown queue: 7");

        let err = MemForgeError::ScratchAllocationFailed("no space".into());
        assert_eq!(err.to_string(), "scratch allocation failed: no space");
    }
}
