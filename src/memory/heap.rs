//! Global device heap and its sub-allocated blocks
//!
//! Single backing allocation subdivided internally, best-fit free block
//! allocation with adjacent-free coalescing to bound fragmentation. The heap
//! only ever grows; growing swaps in a larger backing resource and must be
//! serialized against all queues by the device (see `Device::alloc_heap_block`).

use std::sync::Arc;

use crate::backend::NativeBackend;
use crate::memory::{MemoryError, MemoryKind, MemoryResult, Resource};

/// Free region within the heap, tracked as offset + size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FreeBlock {
    offset: usize,
    size: usize,
}

impl FreeBlock {
    fn new(offset: usize, size: usize) -> Self {
        Self { offset, size }
    }

    fn is_adjacent_to(&self, other: &FreeBlock) -> bool {
        self.offset + self.size == other.offset
    }
}

/// A sub-range of the heap handed out to one allocation.
///
/// Move-only: the handle is the proof of ownership and must be returned to
/// [`Heap::release`] exactly once. Offsets are stable across heap growth
/// because the heap only extends at the end.
#[derive(Debug)]
pub struct HeapBlock {
    offset: usize,
    size: usize,
}

impl HeapBlock {
    /// Byte offset of this block within the heap.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Block size in bytes (the requested size rounded up to the heap's
    /// allocation granularity).
    pub fn size(&self) -> usize {
        self.size
    }
}

/// The device's global memory arena.
///
/// Invariants: live blocks and free regions partition `[0, size)` without
/// overlap; the sum of live block sizes plus free bytes equals the heap size.
/// Both hold because blocks are only ever carved out of and returned to the
/// free list under the device's heap lock.
#[derive(Debug)]
pub struct Heap {
    backend: Arc<dyn NativeBackend>,
    backing: Resource,
    size: usize,
    free_blocks: Vec<FreeBlock>,
    allocated: usize,
    live_blocks: usize,
}

impl Heap {
    /// Allocation granularity. Every block offset and size is a multiple of
    /// this, so free regions never accumulate unaligned padding.
    pub const GRANULARITY: usize = 256;

    /// Create a heap of `size` bytes backed by a fresh local allocation,
    /// falling back to remote memory when local allocation fails.
    pub fn new(backend: &Arc<dyn NativeBackend>, size: usize) -> MemoryResult<Self> {
        let size = align_up(size, Self::GRANULARITY);
        let backing = match Resource::alloc(backend, MemoryKind::Local, size) {
            Ok(res) => res,
            Err(MemoryError::Native(err)) => {
                tracing::warn!("local heap allocation failed ({}), trying remote", err);
                Resource::alloc(backend, MemoryKind::Remote, size)?
            }
            Err(err) => return Err(err),
        };

        tracing::debug!("heap created: {} bytes, kind={:?}", size, backing.kind());

        Ok(Heap {
            backend: Arc::clone(backend),
            backing,
            size,
            free_blocks: vec![FreeBlock::new(0, size)],
            allocated: 0,
            live_blocks: 0,
        })
    }

    /// Total heap size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes currently handed out in live blocks.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated
    }

    /// Bytes available across all free regions.
    pub fn free_bytes(&self) -> usize {
        self.free_blocks.iter().map(|b| b.size).sum()
    }

    /// Largest single free region.
    pub fn largest_free(&self) -> usize {
        self.free_blocks.iter().map(|b| b.size).max().unwrap_or(0)
    }

    /// Number of live blocks.
    pub fn live_blocks(&self) -> usize {
        self.live_blocks
    }

    /// Number of free fragments.
    pub fn fragment_count(&self) -> usize {
        self.free_blocks.len()
    }

    /// The resource backing the whole heap.
    pub fn resource(&self) -> &Resource {
        &self.backing
    }

    /// Resource view covering one block's range.
    pub fn block_view(&self, block: &HeapBlock) -> MemoryResult<Resource> {
        self.backing.view(block.offset, block.size)
    }

    /// Allocate a block of at least `size` bytes, best-fit.
    ///
    /// Returns `None` when no free region is large enough; the device decides
    /// whether to grow the heap or report allocation failure.
    pub fn alloc_block(&mut self, size: usize) -> Option<HeapBlock> {
        if size == 0 {
            return None;
        }
        let size = align_up(size, Self::GRANULARITY);

        let best_idx = self
            .free_blocks
            .iter()
            .enumerate()
            .filter(|(_, block)| block.size >= size)
            .min_by_key(|(_, block)| block.size)
            .map(|(idx, _)| idx)?;

        let block = self.free_blocks[best_idx];
        let remaining = block.size - size;
        if remaining > 0 {
            self.free_blocks[best_idx] = FreeBlock::new(block.offset + size, remaining);
        } else {
            self.free_blocks.remove(best_idx);
        }

        self.allocated += size;
        self.live_blocks += 1;

        tracing::trace!("heap block allocated: offset={} size={}", block.offset, size);
        Some(HeapBlock {
            offset: block.offset,
            size,
        })
    }

    /// Return a block to the free list, coalescing with adjacent free
    /// regions.
    pub fn release(&mut self, block: HeapBlock) {
        tracing::trace!(
            "heap block released: offset={} size={}",
            block.offset,
            block.size
        );
        self.allocated -= block.size;
        self.live_blocks -= 1;
        self.free_blocks.push(FreeBlock::new(block.offset, block.size));
        self.sort_free_blocks();
    }

    /// Grow the heap to `new_size` bytes, copying live data into the new
    /// backing resource.
    ///
    /// The caller must have stalled all queues: live blocks keep their
    /// offsets, but the backing resource (and its device address) changes.
    /// On failure the previous heap is intact and the error is recoverable.
    pub fn realloc(&mut self, new_size: usize, remote_hint: bool) -> MemoryResult<()> {
        let new_size = align_up(new_size, Self::GRANULARITY);
        if new_size <= self.size {
            return Ok(());
        }

        let kind = if remote_hint {
            MemoryKind::Remote
        } else {
            MemoryKind::Local
        };
        let new_backing = Resource::alloc(&self.backend, kind, new_size).map_err(|err| {
            MemoryError::HeapReallocFailed(format!(
                "cannot grow heap from {} to {} bytes: {}",
                self.size, new_size, err
            ))
        })?;

        // Old heap stays valid until the copy lands, so a copy failure is
        // still recoverable.
        new_backing
            .copy_from(0, &self.backing, 0, self.size)
            .map_err(|err| {
                MemoryError::HeapReallocFailed(format!("heap content copy failed: {}", err))
            })?;

        tracing::debug!(
            "heap grown: {} -> {} bytes, kind={:?}",
            self.size,
            new_size,
            kind
        );

        self.free_blocks
            .push(FreeBlock::new(self.size, new_size - self.size));
        self.backing = new_backing;
        self.size = new_size;
        self.sort_free_blocks();
        Ok(())
    }

    fn sort_free_blocks(&mut self) {
        self.free_blocks.sort_by_key(|b| b.offset);
        self.coalesce_free_blocks();
    }

    /// Merge adjacent free regions so released neighbours re-form larger
    /// contiguous spans.
    fn coalesce_free_blocks(&mut self) {
        let mut i = 0;
        while i + 1 < self.free_blocks.len() {
            let current = self.free_blocks[i];
            let next = self.free_blocks[i + 1];
            if current.is_adjacent_to(&next) {
                self.free_blocks[i].size += next.size;
                self.free_blocks.remove(i + 1);
            } else {
                i += 1;
            }
        }
    }
}

fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;

    fn heap(size: usize) -> Heap {
        let backend: Arc<dyn NativeBackend> = Arc::new(HostBackend::new());
        Heap::new(&backend, size).unwrap()
    }

    #[test]
    fn test_alloc_release_accounting() {
        let mut h = heap(64 * 1024);
        assert_eq!(h.free_bytes(), 64 * 1024);

        let a = h.alloc_block(1000).unwrap();
        assert_eq!(a.size(), 1024); // rounded to granularity
        assert_eq!(h.allocated_bytes(), 1024);
        assert_eq!(h.free_bytes(), 64 * 1024 - 1024);
        assert_eq!(h.live_blocks(), 1);

        h.release(a);
        assert_eq!(h.allocated_bytes(), 0);
        assert_eq!(h.free_bytes(), 64 * 1024);
        assert_eq!(h.fragment_count(), 1);
    }

    #[test]
    fn test_best_fit_prefers_smallest_region() {
        let mut h = heap(16 * 1024);
        let a = h.alloc_block(4096).unwrap();
        let b = h.alloc_block(1024).unwrap();
        let _c = h.alloc_block(4096).unwrap();
        let b_offset = b.offset();

        // Free a 4 KiB and a 1 KiB hole; a 1 KiB request should land in the
        // smaller hole.
        h.release(a);
        h.release(b);
        let d = h.alloc_block(1024).unwrap();
        assert_eq!(d.offset(), b_offset);
    }

    #[test]
    fn test_release_coalesces_adjacent_blocks() {
        let mut h = heap(8 * 1024);
        let a = h.alloc_block(1024).unwrap();
        let b = h.alloc_block(1024).unwrap();
        let c = h.alloc_block(1024).unwrap();

        h.release(a);
        h.release(c);
        assert_eq!(h.fragment_count(), 3); // two holes plus the tail

        h.release(b);
        assert_eq!(h.fragment_count(), 1);
        assert_eq!(h.free_bytes(), 8 * 1024);
    }

    #[test]
    fn test_alloc_fails_when_no_region_fits() {
        let mut h = heap(4 * 1024);
        let _a = h.alloc_block(2048).unwrap();
        let _b = h.alloc_block(1536).unwrap();
        assert!(h.alloc_block(1024).is_none());
        assert!(h.alloc_block(0).is_none());
    }

    #[test]
    fn test_realloc_grows_and_preserves_content() {
        let backend: Arc<dyn NativeBackend> = Arc::new(HostBackend::new());
        let mut h = Heap::new(&backend, 4096).unwrap();
        let block = h.alloc_block(256).unwrap();
        h.block_view(&block)
            .unwrap()
            .write_from_host(0, &[0xAB; 256])
            .unwrap();

        h.realloc(16 * 1024, false).unwrap();
        assert_eq!(h.size(), 16 * 1024);
        assert_eq!(h.free_bytes(), 16 * 1024 - 256);

        let mut out = [0u8; 256];
        h.block_view(&block)
            .unwrap()
            .read_to_host(0, &mut out)
            .unwrap();
        assert_eq!(out, [0xAB; 256]);
    }

    #[test]
    fn test_realloc_failure_leaves_heap_intact() {
        // Capacity fits the original heap but not a grown one.
        let backend: Arc<dyn NativeBackend> = Arc::new(HostBackend::with_local_capacity(8 * 1024));
        let mut h = Heap::new(&backend, 4096).unwrap();
        let _block = h.alloc_block(1024).unwrap();

        let err = h.realloc(64 * 1024, false).unwrap_err();
        assert!(matches!(err, MemoryError::HeapReallocFailed(_)));
        assert_eq!(h.size(), 4096);
        assert_eq!(h.allocated_bytes(), 1024);
    }

    #[test]
    fn test_realloc_remote_hint_escapes_local_pressure() {
        let backend: Arc<dyn NativeBackend> = Arc::new(HostBackend::with_local_capacity(8 * 1024));
        let mut h = Heap::new(&backend, 4096).unwrap();
        assert!(h.realloc(64 * 1024, false).is_err());
        h.realloc(64 * 1024, true).unwrap();
        assert_eq!(h.size(), 64 * 1024);
        assert_eq!(h.resource().kind(), MemoryKind::Remote);
    }
}
