//! Device memory objects and the structures that recycle them
//!
//! This module owns the passive side of the resource manager: [`Resource`]
//! handles over native allocations, the global [`Heap`] arena and its
//! [`HeapBlock`] sub-ranges, the [`ResourceCache`] reuse pool, and the
//! [`VaCache`] address-range index. The active side (queues, scratch
//! arbitration, staging pools) lives in [`crate::device`].

pub mod cache;
pub mod heap;
pub mod resource;
pub mod va_cache;

pub use cache::{CacheStats, ResourceCache};
pub use heap::{Heap, HeapBlock};
pub use resource::Resource;
pub use va_cache::VaCache;

use thiserror::Error;

use crate::backend::{NativeError, Placement};

/// Memory type of a [`Resource`], as requested by the allocation descriptor.
///
/// `Ord` so (kind, size) pairs can key the resource cache's ordered buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MemoryKind {
    /// Device-local VRAM.
    Local,
    /// System memory reachable from the device; the fallback placement.
    Remote,
    /// Device-local memory that survives heap reallocation.
    Persistent,
    /// CPU-mappable staging memory.
    HostVisible,
    /// Image-shaped buffer storage.
    ImageBuffer,
}

impl MemoryKind {
    /// Placement flag handed to the native allocator for this kind.
    pub fn placement(self) -> Placement {
        match self {
            MemoryKind::Local | MemoryKind::ImageBuffer => Placement::Local,
            MemoryKind::Remote => Placement::Remote,
            MemoryKind::Persistent => Placement::Persistent,
            MemoryKind::HostVisible => Placement::HostVisible,
        }
    }
}

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("native error: {0}")]
    Native(#[from] NativeError),

    /// The heap had no free region large enough and could not be grown.
    #[error("heap exhausted: {needed} bytes needed, {largest_free} largest free region")]
    HeapExhausted { needed: usize, largest_free: usize },

    /// Growing the heap failed but the previous heap is intact; callers may
    /// retry with a remote placement or surface out-of-memory.
    #[error("heap reallocation failed: {0}")]
    HeapReallocFailed(String),

    #[error("view out of bounds: offset={offset} len={len} resource_size={size}")]
    ViewOutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    /// Inserting an address range that intersects an existing VA cache entry.
    #[error("address range {start:#x}..{end:#x} overlaps an existing VA cache entry")]
    VaRangeOverlap { start: u64, end: u64 },

    #[error("internal lock poisoned - this indicates a bug: {0}")]
    LockPoisoned(String),
}

impl<T> From<std::sync::PoisonError<T>> for MemoryError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        MemoryError::LockPoisoned(format!("Lock poisoned: {}", err))
    }
}

pub type MemoryResult<T> = Result<T, MemoryError>;
