//! Descriptor slot allocator
//!
//! Hardware descriptor records (SRDs) live in host-visible chunks referenced
//! directly by device code, so slots are never moved or compacted - only
//! marked free or occupied in a per-chunk bitmap. When every chunk is full a
//! new fixed-capacity chunk is appended; chunks are never removed.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::backend::NativeBackend;
use crate::error::{MemForgeError, MemResult};
use crate::memory::{MemoryKind, Resource};

/// Width of one bitmap word.
pub const MASK_BITS: usize = 32;

/// Opaque handle encoding (chunk index, slot index).
///
/// Decodes deterministically back to the slot it was allocated from; the
/// encoding is stable for the lifetime of the manager because chunks are
/// append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SrdHandle(u64);

impl SrdHandle {
    fn new(chunk: usize, slot: usize) -> Self {
        SrdHandle(((chunk as u64) << 32) | slot as u64)
    }

    pub fn chunk(&self) -> usize {
        (self.0 >> 32) as usize
    }

    pub fn slot(&self) -> usize {
        (self.0 & 0xffff_ffff) as usize
    }
}

impl fmt::Display for SrdHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "srd:{}:{}", self.chunk(), self.slot())
    }
}

/// One allocated descriptor slot.
#[derive(Debug)]
pub struct SrdSlot {
    pub handle: SrdHandle,
    /// Host-visible address of the slot's record.
    pub host_ptr: *mut u8,
    /// Device address of the slot's record.
    pub device_va: u64,
}

// The raw pointer is an address into a host-visible chunk; the caller
// serializes record writes.
unsafe impl Send for SrdSlot {}

#[derive(Debug)]
struct Chunk {
    backing: Resource,
    flags: Vec<u32>,
}

impl Chunk {
    /// First-fit scan for a clear bit. Returns the slot index within the
    /// chunk, or `None` when full.
    fn claim_slot(&mut self, slots_per_chunk: usize) -> Option<usize> {
        for (word_idx, word) in self.flags.iter_mut().enumerate() {
            if *word == u32::MAX {
                continue;
            }
            let bit = (!*word).trailing_zeros() as usize;
            let slot = word_idx * MASK_BITS + bit;
            if slot >= slots_per_chunk {
                return None;
            }
            *word |= 1 << bit;
            return Some(slot);
        }
        None
    }
}

/// Bitmap-chunk allocator for fixed-size descriptor records.
///
/// Invariant: `srd_size * slots_per_chunk == chunk_buf_size`, so a slot
/// index maps linearly to its byte offset within the chunk.
#[derive(Debug)]
pub struct SrdManager {
    backend: Arc<dyn NativeBackend>,
    srd_size: usize,
    chunk_buf_size: usize,
    slots_per_chunk: usize,
    chunks: Mutex<Vec<Chunk>>,
}

impl SrdManager {
    /// `chunk_buf_size` must be a multiple of `srd_size * MASK_BITS` so the
    /// bitmap covers the chunk exactly.
    pub fn new(
        backend: &Arc<dyn NativeBackend>,
        srd_size: usize,
        chunk_buf_size: usize,
    ) -> MemResult<Self> {
        if srd_size == 0 || chunk_buf_size % (srd_size * MASK_BITS) != 0 {
            return Err(MemForgeError::InvalidConfiguration(format!(
                "descriptor chunk size {} is not a multiple of srd_size {} x {}",
                chunk_buf_size, srd_size, MASK_BITS
            )));
        }
        Ok(Self {
            backend: Arc::clone(backend),
            srd_size,
            chunk_buf_size,
            slots_per_chunk: chunk_buf_size / srd_size,
            chunks: Mutex::new(Vec::new()),
        })
    }

    /// Descriptor record size in bytes.
    pub fn srd_size(&self) -> usize {
        self.srd_size
    }

    /// Total slot capacity across all chunks.
    pub fn capacity(&self) -> MemResult<usize> {
        let chunks = self.chunks.lock()?;
        Ok(chunks.len() * self.slots_per_chunk)
    }

    /// Number of occupied slots.
    pub fn occupied(&self) -> MemResult<usize> {
        let chunks = self.chunks.lock()?;
        Ok(chunks
            .iter()
            .map(|c| c.flags.iter().map(|w| w.count_ones() as usize).sum::<usize>())
            .sum())
    }

    /// Claim the first free slot, appending a new chunk when all existing
    /// chunks are full.
    pub fn alloc_slot(&self) -> MemResult<SrdSlot> {
        let mut chunks = self.chunks.lock()?;

        for (chunk_idx, chunk) in chunks.iter_mut().enumerate() {
            if let Some(slot) = chunk.claim_slot(self.slots_per_chunk) {
                return self.slot_record(chunk, chunk_idx, slot);
            }
        }

        let backing = Resource::alloc(&self.backend, MemoryKind::HostVisible, self.chunk_buf_size)
            .map_err(MemForgeError::Memory)?;
        let num_flags = self.slots_per_chunk / MASK_BITS;
        let mut chunk = Chunk {
            backing,
            flags: vec![0; num_flags],
        };
        tracing::debug!(
            "srd chunk appended: {} slots x {} bytes",
            self.slots_per_chunk,
            self.srd_size
        );

        // Fresh chunk, slot 0 is always free.
        let slot = chunk
            .claim_slot(self.slots_per_chunk)
            .ok_or_else(|| MemForgeError::Internal("fresh descriptor chunk has no free slot".into()))?;
        let chunk_idx = chunks.len();
        let record = self.slot_record(&chunk, chunk_idx, slot);
        chunks.push(chunk);
        record
    }

    /// Clear the slot's occupancy bit.
    pub fn free_slot(&self, handle: SrdHandle) -> MemResult<()> {
        let mut chunks = self.chunks.lock()?;
        let chunk = chunks.get_mut(handle.chunk()).ok_or_else(|| {
            MemForgeError::Internal(format!("descriptor handle {} has no chunk", handle))
        })?;

        let word = handle.slot() / MASK_BITS;
        let bit = 1u32 << (handle.slot() % MASK_BITS);
        if handle.slot() >= self.slots_per_chunk || chunk.flags[word] & bit == 0 {
            return Err(MemForgeError::Internal(format!(
                "descriptor handle {} is not occupied",
                handle
            )));
        }
        chunk.flags[word] &= !bit;
        tracing::trace!("srd slot freed: {}", handle);
        Ok(())
    }

    /// Chunk backing resources, for residency bookkeeping when building the
    /// device's resource list.
    pub fn resource_list(&self) -> MemResult<Vec<Resource>> {
        let chunks = self.chunks.lock()?;
        Ok(chunks.iter().map(|c| c.backing.clone()).collect())
    }

    fn slot_record(&self, chunk: &Chunk, chunk_idx: usize, slot: usize) -> MemResult<SrdSlot> {
        let offset = slot * self.srd_size;
        let host_ptr = chunk
            .backing
            .host_ptr()
            .map(|base| unsafe { base.add(offset) })
            .ok_or_else(|| {
                MemForgeError::Internal("descriptor chunk is not host-visible".into())
            })?;
        let handle = SrdHandle::new(chunk_idx, slot);
        tracing::trace!("srd slot allocated: {}", handle);
        Ok(SrdSlot {
            handle,
            host_ptr,
            device_va: chunk.backing.device_va() + offset as u64,
        })
    }
}
