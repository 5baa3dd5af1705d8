//! Native allocation layer
//!
//! Everything above this module deals in [`crate::memory::Resource`] handles;
//! this module is the seam to the actual device allocator. The runtime talks
//! to it through the [`NativeBackend`] trait so the resource manager can be
//! driven by a real device, by the host-memory simulator ([`HostBackend`]),
//! or by the offline capability stub ([`NullBackend`]). The variant is picked
//! once at device construction, not per call.

pub mod error;
pub mod host;
pub mod null;

pub use error::{NativeError, NativeResult};
pub use host::HostBackend;
pub use null::NullBackend;

use std::fmt;

/// Physical placement of a native allocation.
///
/// Mirrors the placement flag the native allocator takes: device-local VRAM,
/// remote (system memory visible to the device), persistent (pinned local),
/// or host-visible staging memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placement {
    Local,
    Remote,
    Persistent,
    HostVisible,
}

/// One native allocation as handed out by a backend.
///
/// `host_ptr` is null unless the placement is CPU-mappable. The struct is
/// `Copy` on purpose: it is a descriptor, not an owner. Freeing goes through
/// [`NativeBackend::free`] with the handle.
#[derive(Debug, Clone, Copy)]
pub struct NativeAllocation {
    /// Backend-issued opaque handle, used for free/copy/transfer calls.
    pub handle: u64,
    /// Device-visible base address of the allocation.
    pub device_va: u64,
    /// Allocation size in bytes.
    pub size: usize,
    /// Where the bytes physically live.
    pub placement: Placement,
    /// Mapped CPU address, null for placements the host cannot see.
    pub host_ptr: *mut u8,
}

impl NativeAllocation {
    /// True when the host can read/write this allocation directly.
    pub fn is_host_visible(&self) -> bool {
        !self.host_ptr.is_null()
    }
}

// SAFETY: NativeAllocation is a plain descriptor; the raw pointer is only
// dereferenced while the owning backend keeps the allocation alive, and all
// mutation goes through backend calls that serialize internally.
unsafe impl Send for NativeAllocation {}
unsafe impl Sync for NativeAllocation {}

/// Slow, coarse native allocation primitives consumed by the resource layer.
///
/// Implementations must be internally synchronized: the device calls these
/// from many host threads, usually while holding exactly one of its own
/// structure locks.
pub trait NativeBackend: Send + Sync + fmt::Debug {
    /// Allocate `size` bytes with the given placement.
    ///
    /// Failure is reported as `Err(NativeError::OutOfMemory)` and is never
    /// fatal; callers are expected to apply a fallback placement.
    fn alloc(&self, size: usize, placement: Placement) -> NativeResult<NativeAllocation>;

    /// Free a previously issued allocation.
    fn free(&self, handle: u64) -> NativeResult<()>;

    /// Device-side copy between two allocations.
    fn copy(
        &self,
        src: u64,
        src_offset: usize,
        dst: u64,
        dst_offset: usize,
        len: usize,
    ) -> NativeResult<()>;

    /// Host-to-device transfer into an allocation.
    fn upload(&self, dst: u64, dst_offset: usize, data: &[u8]) -> NativeResult<()>;

    /// Device-to-host transfer out of an allocation.
    fn download(&self, src: u64, src_offset: usize, out: &mut [u8]) -> NativeResult<()>;

    /// Bytes of device-local memory still available, or `None` when the
    /// backend cannot report it (offline variant).
    fn global_free_memory(&self) -> Option<u64>;
}
