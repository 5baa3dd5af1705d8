//! Host-memory backed native allocator
//!
//! Stands in for the device allocator: every "device" allocation is a boxed
//! byte buffer, device VAs come from a bump allocator, and host-visible
//! placements expose a real CPU pointer into the buffer. Device-local
//! capacity is bounded so out-of-memory paths (cache trimming, remote
//! fallback, heap realloc failure) can be exercised deterministically.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::backend::{NativeAllocation, NativeBackend, NativeError, NativeResult, Placement};

/// Device VAs start well above null so a zero pointer is never a valid range.
const VA_BASE: u64 = 0x1000_0000;

/// VA ranges are spaced to the next page boundary.
const VA_ALIGN: u64 = 4096;

#[derive(Debug)]
struct HostAllocation {
    data: Box<[u8]>,
    device_va: u64,
    placement: Placement,
}

#[derive(Debug, Default)]
struct HostState {
    next_handle: u64,
    next_va: u64,
    local_in_use: u64,
    allocs: HashMap<u64, HostAllocation>,
}

/// Real-resource backend variant, backed by host memory.
#[derive(Debug)]
pub struct HostBackend {
    /// Simulated device-local capacity in bytes.
    local_capacity: u64,
    state: Mutex<HostState>,
}

impl HostBackend {
    pub const DEFAULT_LOCAL_CAPACITY: u64 = 256 * 1024 * 1024;

    pub fn new() -> Self {
        Self::with_local_capacity(Self::DEFAULT_LOCAL_CAPACITY)
    }

    /// Backend with an explicit device-local ceiling. Small ceilings are the
    /// hook tests use to force native allocation failure.
    pub fn with_local_capacity(local_capacity: u64) -> Self {
        HostBackend {
            local_capacity,
            state: Mutex::new(HostState {
                next_handle: 1,
                next_va: VA_BASE,
                local_in_use: 0,
                allocs: HashMap::new(),
            }),
        }
    }

    /// Number of live native allocations. Conservation check for tests:
    /// every handle handed out and not yet freed counts as one.
    pub fn allocation_count(&self) -> u64 {
        match self.state.lock() {
            Ok(state) => state.allocs.len() as u64,
            Err(poisoned) => poisoned.into_inner().allocs.len() as u64,
        }
    }

    fn counts_against_local(placement: Placement) -> bool {
        matches!(placement, Placement::Local | Placement::Persistent)
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeBackend for HostBackend {
    fn alloc(&self, size: usize, placement: Placement) -> NativeResult<NativeAllocation> {
        if size == 0 {
            return Err(NativeError::OutOfMemory(
                "zero-size allocation".to_string(),
            ));
        }

        let mut state = self.state.lock()?;

        if Self::counts_against_local(placement)
            && state.local_in_use + size as u64 > self.local_capacity
        {
            tracing::debug!(
                "host backend out of local memory: {} in use, {} requested, {} capacity",
                state.local_in_use,
                size,
                self.local_capacity
            );
            return Err(NativeError::OutOfMemory(format!(
                "local memory exhausted: {} bytes requested, {} available",
                size,
                self.local_capacity - state.local_in_use
            )));
        }

        let handle = state.next_handle;
        state.next_handle += 1;

        let device_va = state.next_va;
        let spaced = (size as u64 + VA_ALIGN - 1) & !(VA_ALIGN - 1);
        state.next_va += spaced;

        let data = vec![0u8; size].into_boxed_slice();
        let host_ptr = if placement == Placement::HostVisible {
            // Heap storage behind the Box is stable even when the HashMap
            // rehashes, so the pointer stays valid for the allocation's life.
            data.as_ptr() as *mut u8
        } else {
            std::ptr::null_mut()
        };

        if Self::counts_against_local(placement) {
            state.local_in_use += size as u64;
        }
        state.allocs.insert(
            handle,
            HostAllocation {
                data,
                device_va,
                placement,
            },
        );

        tracing::trace!(
            "host backend alloc: handle={} va={:#x} size={} placement={:?}",
            handle,
            device_va,
            size,
            placement
        );

        Ok(NativeAllocation {
            handle,
            device_va,
            size,
            placement,
            host_ptr,
        })
    }

    fn free(&self, handle: u64) -> NativeResult<()> {
        let mut state = self.state.lock()?;
        let alloc = state
            .allocs
            .remove(&handle)
            .ok_or(NativeError::InvalidHandle(handle))?;
        if Self::counts_against_local(alloc.placement) {
            state.local_in_use -= alloc.data.len() as u64;
        }
        tracing::trace!("host backend free: handle={}", handle);
        Ok(())
    }

    fn copy(
        &self,
        src: u64,
        src_offset: usize,
        dst: u64,
        dst_offset: usize,
        len: usize,
    ) -> NativeResult<()> {
        let mut state = self.state.lock()?;

        let src_alloc = state
            .allocs
            .get(&src)
            .ok_or(NativeError::InvalidHandle(src))?;
        if src_offset + len > src_alloc.data.len() {
            return Err(NativeError::OutOfBounds(format!(
                "copy source: offset={} len={} size={}",
                src_offset,
                len,
                src_alloc.data.len()
            )));
        }
        let tmp = src_alloc.data[src_offset..src_offset + len].to_vec();

        let dst_alloc = state
            .allocs
            .get_mut(&dst)
            .ok_or(NativeError::InvalidHandle(dst))?;
        if dst_offset + len > dst_alloc.data.len() {
            return Err(NativeError::OutOfBounds(format!(
                "copy destination: offset={} len={} size={}",
                dst_offset,
                len,
                dst_alloc.data.len()
            )));
        }
        dst_alloc.data[dst_offset..dst_offset + len].copy_from_slice(&tmp);
        Ok(())
    }

    fn upload(&self, dst: u64, dst_offset: usize, data: &[u8]) -> NativeResult<()> {
        let mut state = self.state.lock()?;
        let alloc = state
            .allocs
            .get_mut(&dst)
            .ok_or(NativeError::InvalidHandle(dst))?;
        if dst_offset + data.len() > alloc.data.len() {
            return Err(NativeError::OutOfBounds(format!(
                "upload: offset={} len={} size={}",
                dst_offset,
                data.len(),
                alloc.data.len()
            )));
        }
        alloc.data[dst_offset..dst_offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn download(&self, src: u64, src_offset: usize, out: &mut [u8]) -> NativeResult<()> {
        let state = self.state.lock()?;
        let alloc = state
            .allocs
            .get(&src)
            .ok_or(NativeError::InvalidHandle(src))?;
        if src_offset + out.len() > alloc.data.len() {
            return Err(NativeError::OutOfBounds(format!(
                "download: offset={} len={} size={}",
                src_offset,
                out.len(),
                alloc.data.len()
            )));
        }
        out.copy_from_slice(&alloc.data[src_offset..src_offset + out.len()]);
        Ok(())
    }

    fn global_free_memory(&self) -> Option<u64> {
        let state = self.state.lock().ok()?;
        Some(self.local_capacity - state.local_in_use)
    }
}
