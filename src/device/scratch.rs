//! Per-queue scratch sizing over one shared store
//!
//! Device code addresses scratch through offsets into a single global store,
//! so every queue's region must stay put while any work is in flight.
//! Growing the store invalidates all offsets at once; the device only calls
//! [`ScratchState::grow`] after stalling every queue. Scratch contents are
//! spill space and are not preserved across growth.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::NativeBackend;
use crate::error::{MemForgeError, MemResult};
use crate::memory::{MemoryKind, Resource};

/// One queue's slice of the scratch store.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScratchBuffer {
    /// Highest register count this queue has requested.
    pub reg_num: u32,
    /// Byte offset of the queue's region within the store.
    pub offset: usize,
    /// Region size in bytes.
    pub size: usize,
}

/// Scratch store plus the per-queue region table, guarded by the device's
/// scratch lock.
#[derive(Debug)]
pub struct ScratchState {
    store: Option<Resource>,
    bytes_per_reg: usize,
    granularity: usize,
    slots: HashMap<usize, ScratchBuffer>,
}

impl ScratchState {
    pub(crate) fn new(bytes_per_reg: usize, granularity: usize) -> Self {
        Self {
            store: None,
            bytes_per_reg,
            granularity,
            slots: HashMap::new(),
        }
    }

    /// Bytes a request for `reg_num` registers requires, rounded up to the
    /// store granularity.
    pub fn required_size(&self, reg_num: u32) -> usize {
        let raw = reg_num as usize * self.bytes_per_reg;
        if raw == 0 {
            return 0;
        }
        (raw + self.granularity - 1) & !(self.granularity - 1)
    }

    /// Current store size in bytes (monotonic).
    pub fn store_size(&self) -> usize {
        self.store.as_ref().map(|s| s.size()).unwrap_or(0)
    }

    /// This queue's scratch region, if registered.
    pub fn buffer(&self, queue_id: usize) -> Option<ScratchBuffer> {
        self.slots.get(&queue_id).copied()
    }

    pub(crate) fn register_queue(&mut self, queue_id: usize) {
        self.slots.insert(queue_id, ScratchBuffer::default());
    }

    /// Drop a destroyed queue's region. The store itself never shrinks.
    pub(crate) fn remove_queue(&mut self, queue_id: usize) {
        self.slots.remove(&queue_id);
    }

    /// Record a request for `reg_num` registers and report whether
    /// satisfying it needs the stall-growth path.
    ///
    /// The register high-water mark advances on every request, including
    /// ones the current region already covers: a larger request can round
    /// into the same granule and change nothing but `reg_num`.
    pub(crate) fn request(&mut self, queue_id: usize, reg_num: u32) -> MemResult<bool> {
        let required = self.required_size(reg_num);
        let slot = self
            .slots
            .get_mut(&queue_id)
            .ok_or(MemForgeError::UnknownQueue(queue_id))?;
        slot.reg_num = slot.reg_num.max(reg_num);
        Ok(required > slot.size)
    }

    /// Grow the requesting queue's region and, if the summed regions exceed
    /// the store, replace the store with a larger one.
    ///
    /// Caller must hold the scratch and async-ops locks with all queues
    /// stalled: every region offset may move. On native allocation failure
    /// the previous store and all offsets are untouched.
    pub(crate) fn grow(
        &mut self,
        backend: &Arc<dyn NativeBackend>,
        queue_id: usize,
        reg_num: u32,
    ) -> MemResult<()> {
        let required = self.required_size(reg_num);
        let slot = self
            .slots
            .get_mut(&queue_id)
            .ok_or(MemForgeError::UnknownQueue(queue_id))?;
        slot.reg_num = slot.reg_num.max(reg_num);
        if required <= slot.size {
            return Ok(());
        }

        // Lay out the new region table before touching the store so failure
        // leaves everything intact.
        let mut layout: Vec<(usize, ScratchBuffer)> = self
            .slots
            .iter()
            .map(|(&id, &buf)| (id, buf))
            .collect();
        layout.sort_by_key(|(id, _)| *id);

        let mut total = 0usize;
        for (id, buf) in layout.iter_mut() {
            if *id == queue_id {
                buf.size = required;
            }
            buf.offset = total;
            total += buf.size;
        }

        if total > self.store_size() {
            let store = match Resource::alloc(backend, MemoryKind::Local, total) {
                Ok(store) => store,
                Err(err) => {
                    tracing::warn!("local scratch store allocation failed ({}), trying remote", err);
                    Resource::alloc(backend, MemoryKind::Remote, total).map_err(|err| {
                        MemForgeError::ScratchAllocationFailed(format!(
                            "cannot grow scratch store to {} bytes: {}",
                            total, err
                        ))
                    })?
                }
            };
            tracing::debug!(
                "scratch store grown: {} -> {} bytes",
                self.store_size(),
                total
            );
            self.store = Some(store);
        }

        for (id, buf) in layout {
            self.slots.insert(id, buf);
        }
        Ok(())
    }
}
