//! Device composition root
//!
//! A `Device` owns the global heap, the idle-resource cache, the VA lookup
//! map, the descriptor slot manager, the scratch store, both staging pools,
//! and the queue list. Every structure has its own lock; operations that
//! need more than one acquire them in the fixed order
//!
//!   queue list -> scratch -> async-ops
//!
//! with the per-structure locks (heap, cache, VA cache, map-target cache,
//! SRD, staging pools) as leaves that are never held while taking another
//! lock. Heap growth and
//! scratch regrowth stall every queue first: device code may hold raw heap
//! or scratch offsets, and both operations move the backing store.

mod map_cache;
pub mod queue;
pub mod scratch;
pub mod srd;
pub mod xfer;

pub use queue::{VirtualGpu, WorkGuard, WorkTracker};
pub use scratch::{ScratchBuffer, ScratchState};
pub use srd::{SrdHandle, SrdManager, SrdSlot, MASK_BITS};
pub use xfer::{XferBuf, XferBuffers, MAX_XFER_BUF_LIST_SIZE};

use map_cache::MapCache;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::{NativeBackend, NativeError};
use crate::error::{MemForgeError, MemResult};
use crate::memory::{
    CacheStats, Heap, HeapBlock, MemoryError, MemoryKind, Resource, ResourceCache, VaCache,
};

/// Tunables for one device instance.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Initial global heap size in bytes. The heap is created on first use.
    pub heap_size: usize,
    /// Byte ceiling for the idle-resource cache.
    pub cache_ceiling: u64,
    /// Minimum reported free device memory below which freed resources are
    /// dropped (and the cache trimmed) instead of cached.
    pub cache_headroom: u64,
    /// Staging buffer size for the transfer pools.
    pub xfer_buf_size: usize,
    /// Descriptor record size in bytes.
    pub srd_size: usize,
    /// Backing buffer size of one descriptor chunk.
    pub srd_chunk_size: usize,
    /// Scratch bytes per register.
    pub scratch_bytes_per_reg: usize,
    /// Scratch store allocation granularity.
    pub scratch_granularity: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            heap_size: 64 * 1024 * 1024,
            cache_ceiling: 32 * 1024 * 1024,
            cache_headroom: 16 * 1024 * 1024,
            xfer_buf_size: 1024 * 1024,
            srd_size: 16,
            srd_chunk_size: 16 * MASK_BITS * 16,
            scratch_bytes_per_reg: 256,
            scratch_granularity: 64 * 1024,
        }
    }
}

impl DeviceConfig {
    fn validate(&self) -> MemResult<()> {
        if self.heap_size == 0 {
            return Err(MemForgeError::InvalidConfiguration(
                "heap_size must be non-zero".into(),
            ));
        }
        if self.xfer_buf_size == 0 {
            return Err(MemForgeError::InvalidConfiguration(
                "xfer_buf_size must be non-zero".into(),
            ));
        }
        if self.scratch_bytes_per_reg == 0 || !self.scratch_granularity.is_power_of_two() {
            return Err(MemForgeError::InvalidConfiguration(
                "scratch sizing must be non-zero with power-of-two granularity".into(),
            ));
        }
        Ok(())
    }
}

/// Shape of one allocation request.
#[derive(Debug, Clone, Copy)]
pub struct MemoryDesc {
    pub kind: MemoryKind,
    pub size: usize,
    /// Pooled allocations may be served from the idle-resource cache;
    /// dedicated ones always get a fresh native allocation.
    pub pooled: bool,
}

impl MemoryDesc {
    pub fn pooled(kind: MemoryKind, size: usize) -> Self {
        Self {
            kind,
            size,
            pooled: true,
        }
    }

    pub fn dedicated(kind: MemoryKind, size: usize) -> Self {
        Self {
            kind,
            size,
            pooled: false,
        }
    }
}

/// The device-resident resource manager.
pub struct Device {
    backend: Arc<dyn NativeBackend>,
    config: DeviceConfig,
    // Held in acquisition order: vgpus before scratch before async_ops.
    vgpus: Mutex<Vec<Arc<VirtualGpu>>>,
    scratch: Mutex<ScratchState>,
    async_ops: Mutex<()>,
    // Leaf locks.
    heap: Mutex<Option<Heap>>,
    cache: Mutex<ResourceCache>,
    va_cache: Mutex<VaCache>,
    map_cache: Mutex<MapCache>,
    srd: SrdManager,
    xfer_read: XferBuffers,
    xfer_write: XferBuffers,
    next_queue_id: AtomicUsize,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("backend", &self.backend)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Device {
    pub fn new(backend: Arc<dyn NativeBackend>, config: DeviceConfig) -> MemResult<Self> {
        config.validate()?;
        let srd = SrdManager::new(&backend, config.srd_size, config.srd_chunk_size)?;
        tracing::info!(
            "device created: heap={}B cache_ceiling={}B xfer_buf={}B",
            config.heap_size,
            config.cache_ceiling,
            config.xfer_buf_size
        );
        Ok(Self {
            vgpus: Mutex::new(Vec::new()),
            scratch: Mutex::new(ScratchState::new(
                config.scratch_bytes_per_reg,
                config.scratch_granularity,
            )),
            async_ops: Mutex::new(()),
            heap: Mutex::new(None),
            cache: Mutex::new(ResourceCache::new(config.cache_ceiling)),
            va_cache: Mutex::new(VaCache::new()),
            map_cache: Mutex::new(MapCache::new()),
            srd,
            xfer_read: XferBuffers::new(&backend, config.xfer_buf_size),
            xfer_write: XferBuffers::new(&backend, config.xfer_buf_size),
            next_queue_id: AtomicUsize::new(0),
            backend,
            config,
        })
    }

    /// Same-config device over the default host backend; test and tooling
    /// convenience.
    pub fn with_host_backend(config: DeviceConfig) -> MemResult<Self> {
        Self::new(Arc::new(crate::backend::HostBackend::new()), config)
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn NativeBackend> {
        &self.backend
    }

    // ========== Memory objects ==========

    /// Create a memory object per `desc`.
    ///
    /// Pooled requests are served from the idle-resource cache when a
    /// suitable entry exists; misses and dedicated requests hit the native
    /// allocator. Local-memory allocation failure falls back to remote
    /// placement before the error is reported.
    pub fn create_memory(&self, desc: &MemoryDesc) -> MemResult<Resource> {
        if desc.pooled {
            let mut cache = self.cache.lock()?;
            if let Some(res) = cache.acquire(desc.kind, desc.size) {
                return Ok(res);
            }
        }
        self.alloc_native(desc.kind, desc.size)
    }

    /// View of `[offset, offset + len)` within an existing memory object.
    pub fn create_view(
        &self,
        base: &Resource,
        offset: usize,
        len: usize,
    ) -> MemResult<Resource> {
        base.view(offset, len).map_err(MemForgeError::Memory)
    }

    /// Replace `res` with a larger allocation of the same kind, preserving
    /// the existing prefix. Requests that fit the current allocation return
    /// a plain clone.
    pub fn realloc_memory(&self, res: &Resource, new_size: usize) -> MemResult<Resource> {
        if new_size <= res.size() {
            return Ok(res.clone());
        }
        // Serialized against heap/scratch growth: the copy reads device
        // memory that those operations may move.
        let _async = self.async_ops.lock()?;
        let grown = self.alloc_native(res.kind(), new_size)?;
        grown.copy_from(0, res, 0, res.size())?;
        tracing::debug!(
            "memory reallocated: {} -> {} bytes, kind={:?}",
            res.size(),
            new_size,
            res.kind()
        );
        Ok(grown)
    }

    /// Release a memory object.
    ///
    /// Views drop without touching native memory (the parent owns it).
    /// Cacheable resources are parked in the idle cache unless the backend
    /// reports memory pressure, in which case the cache is trimmed and the
    /// resource genuinely freed.
    pub fn free_memory(&self, res: Resource) -> MemResult<()> {
        if res.is_view() {
            return Ok(());
        }
        let under_pressure = self
            .backend
            .global_free_memory()
            .map(|free| free < self.config.cache_headroom)
            .unwrap_or(false);

        let mut cache = self.cache.lock()?;
        if under_pressure {
            tracing::debug!("memory pressure: trimming idle cache instead of caching");
            cache.trim(0);
            return Ok(()); // res drops here, freeing native memory
        }
        cache.release(res);
        Ok(())
    }

    /// Reported free device memory, when the backend supports the query.
    pub fn global_free_memory(&self) -> Option<u64> {
        self.backend.global_free_memory()
    }

    pub fn cache_stats(&self) -> MemResult<CacheStats> {
        Ok(self.cache.lock()?.stats())
    }

    pub fn trim_cache(&self, target_bytes: u64) -> MemResult<()> {
        self.cache.lock()?.trim(target_bytes);
        Ok(())
    }

    fn alloc_native(&self, kind: MemoryKind, size: usize) -> MemResult<Resource> {
        match Resource::alloc(&self.backend, kind, size) {
            Ok(res) => Ok(res),
            Err(MemoryError::Native(NativeError::OutOfMemory(msg)))
                if kind != MemoryKind::Remote && kind != MemoryKind::HostVisible =>
            {
                tracing::warn!(
                    "{:?} allocation of {} bytes failed ({}), falling back to remote",
                    kind,
                    size,
                    msg
                );
                Resource::alloc(&self.backend, MemoryKind::Remote, size)
                    .map_err(MemForgeError::Memory)
            }
            Err(err) => Err(MemForgeError::Memory(err)),
        }
    }

    // ========== Heap ==========

    /// Sub-allocate `size` bytes from the global heap, growing it (with a
    /// full queue stall) when no free region fits.
    ///
    /// The growth path waits for every queue to drain, so the caller must
    /// not hold a [`WorkGuard`] of its own while requesting a block.
    pub fn alloc_heap_block(&self, size: usize) -> MemResult<HeapBlock> {
        // Fast path under the heap lock alone.
        {
            let mut heap = self.heap.lock()?;
            let h = Self::heap_mut(&mut heap, &self.backend, self.config.heap_size)?;
            if let Some(block) = h.alloc_block(size) {
                return Ok(block);
            }
        }

        // Growth path. Queue-list lock first: no new queues while stalled.
        let vgpus = self.vgpus.lock()?;
        for q in vgpus.iter() {
            q.drain();
        }
        let _async = self.async_ops.lock()?;

        let mut heap = self.heap.lock()?;
        let h = Self::heap_mut(&mut heap, &self.backend, self.config.heap_size)?;
        // Another thread may have grown the heap while we took the locks.
        if let Some(block) = h.alloc_block(size) {
            return Ok(block);
        }

        let new_size = (h.size() + size).max(h.size() * 2);
        if let Err(err) = h.realloc(new_size, false) {
            tracing::warn!("heap growth failed locally ({}), retrying remote", err);
            h.realloc(new_size, true)?;
        }

        h.alloc_block(size).ok_or_else(|| {
            MemForgeError::Memory(MemoryError::HeapExhausted {
                needed: size,
                largest_free: h.largest_free(),
            })
        })
    }

    /// Return a heap block to the free list.
    pub fn release_heap_block(&self, block: HeapBlock) -> MemResult<()> {
        let mut heap = self.heap.lock()?;
        match heap.as_mut() {
            Some(h) => {
                h.release(block);
                Ok(())
            }
            None => Err(MemForgeError::Internal(
                "heap block released before heap initialization".into(),
            )),
        }
    }

    /// Resource view covering one heap block.
    pub fn heap_view(&self, block: &HeapBlock) -> MemResult<Resource> {
        let mut heap = self.heap.lock()?;
        let h = Self::heap_mut(&mut heap, &self.backend, self.config.heap_size)?;
        h.block_view(block).map_err(MemForgeError::Memory)
    }

    /// Current heap size; zero before first use.
    pub fn heap_size(&self) -> MemResult<usize> {
        let heap = self.heap.lock()?;
        Ok(heap.as_ref().map(|h| h.size()).unwrap_or(0))
    }

    /// Lazy heap initialization under the heap lock. Construction stays
    /// cheap for devices that never allocate (offline backends).
    fn heap_mut<'a>(
        heap: &'a mut Option<Heap>,
        backend: &Arc<dyn NativeBackend>,
        initial_size: usize,
    ) -> MemResult<&'a mut Heap> {
        if heap.is_none() {
            *heap = Some(Heap::new(backend, initial_size)?);
        }
        heap.as_mut()
            .ok_or_else(|| MemForgeError::Internal("heap missing after initialization".into()))
    }

    // ========== Queues ==========

    /// Register a new compute queue.
    pub fn create_queue(&self) -> MemResult<Arc<VirtualGpu>> {
        let id = self.next_queue_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(VirtualGpu::new(id));

        let mut vgpus = self.vgpus.lock()?;
        let mut scratch = self.scratch.lock()?;
        scratch.register_queue(id);
        vgpus.push(Arc::clone(&queue));
        tracing::debug!("queue {} created ({} live)", id, vgpus.len());
        Ok(queue)
    }

    /// Drain and unregister a queue. Its scratch region is retired; the
    /// scratch store itself never shrinks.
    pub fn destroy_queue(&self, queue: &Arc<VirtualGpu>) -> MemResult<()> {
        queue.drain();

        let mut vgpus = self.vgpus.lock()?;
        let before = vgpus.len();
        vgpus.retain(|q| !Arc::ptr_eq(q, queue));
        if vgpus.len() == before {
            return Err(MemForgeError::UnknownQueue(queue.id()));
        }
        let mut scratch = self.scratch.lock()?;
        scratch.remove_queue(queue.id());
        tracing::debug!("queue {} destroyed ({} live)", queue.id(), vgpus.len());
        Ok(())
    }

    pub fn queue_count(&self) -> MemResult<usize> {
        Ok(self.vgpus.lock()?.len())
    }

    /// Block until every live queue has drained its in-flight work.
    pub fn stall_queues(&self) -> MemResult<()> {
        let vgpus = self.vgpus.lock()?;
        tracing::debug!("stalling {} queues", vgpus.len());
        for q in vgpus.iter() {
            q.drain();
        }
        Ok(())
    }

    // ========== Scratch ==========

    /// Ensure `queue` has scratch for `reg_num` registers.
    ///
    /// Requests at or below the queue's current allocation return
    /// immediately. Growth stalls all queues, recomputes every queue's
    /// offset, and swaps the store; scratch contents are not preserved.
    /// As with heap growth, the caller must not hold a live [`WorkGuard`]
    /// while the request can grow the store.
    pub fn alloc_scratch(&self, queue: &VirtualGpu, reg_num: u32) -> MemResult<()> {
        {
            let mut scratch = self.scratch.lock()?;
            if !scratch.request(queue.id(), reg_num)? {
                return Ok(());
            }
        }

        let vgpus = self.vgpus.lock()?;
        for q in vgpus.iter() {
            q.drain();
        }
        let mut scratch = self.scratch.lock()?;
        let _async = self.async_ops.lock()?;
        scratch.grow(&self.backend, queue.id(), reg_num)
    }

    /// The queue's current scratch region, if any.
    pub fn scratch_buffer(&self, queue: &VirtualGpu) -> MemResult<Option<ScratchBuffer>> {
        Ok(self.scratch.lock()?.buffer(queue.id()))
    }

    /// Global scratch store size (monotonic).
    pub fn scratch_store_size(&self) -> MemResult<usize> {
        Ok(self.scratch.lock()?.store_size())
    }

    // ========== Descriptor slots ==========

    pub fn alloc_srd_slot(&self) -> MemResult<SrdSlot> {
        self.srd.alloc_slot()
    }

    pub fn free_srd_slot(&self, handle: SrdHandle) -> MemResult<()> {
        self.srd.free_slot(handle)
    }

    /// Descriptor chunk backing resources, for residency lists.
    pub fn srd_resources(&self) -> MemResult<Vec<Resource>> {
        self.srd.resource_list()
    }

    // ========== Staging pools ==========

    /// Staging pool for device-to-host transfers.
    pub fn xfer_read(&self) -> &XferBuffers {
        &self.xfer_read
    }

    /// Staging pool for host-to-device transfers.
    pub fn xfer_write(&self) -> &XferBuffers {
        &self.xfer_write
    }

    // ========== Map targets ==========

    /// Reusable host map-target buffer for a `size`-byte mapping, if one is
    /// parked. A miss on a full cache may drop the largest parked target to
    /// make room for the fresh buffer the caller allocates instead.
    pub fn find_map_target(&self, size: usize) -> MemResult<Option<Resource>> {
        Ok(self.map_cache.lock()?.find(size))
    }

    /// Park a finished map target for reuse. Returns whether it was kept;
    /// rejected targets (views, shared handles) drop and free their memory.
    pub fn add_map_target(&self, target: Resource) -> MemResult<bool> {
        Ok(self.map_cache.lock()?.add(target))
    }

    /// Number of parked map targets.
    pub fn map_target_count(&self) -> MemResult<usize> {
        Ok(self.map_cache.lock()?.len())
    }

    // ========== VA lookup ==========

    /// Register a memory object's device address range for pointer lookup.
    pub fn add_va_cache(&self, res: &Resource) -> MemResult<()> {
        self.va_cache.lock()?.add(res).map_err(MemForgeError::Memory)
    }

    /// Drop a memory object's range. Returns whether an entry was removed.
    pub fn remove_va_cache(&self, res: &Resource) -> MemResult<bool> {
        Ok(self.va_cache.lock()?.remove(res))
    }

    /// Resolve a raw device address to its owning memory object and byte
    /// offset, or `None` when the address is not mapped.
    pub fn find_memory_from_va(&self, va: u64) -> MemResult<Option<(Resource, u64)>> {
        Ok(self.va_cache.lock()?.find(va))
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        // Teardown order: quiesce queues, then drop the structures that own
        // device memory. Lock poison is ignored here; nothing else can hold
        // the device.
        if let Ok(vgpus) = self.vgpus.get_mut() {
            for q in vgpus.iter() {
                q.drain();
            }
        }
        if let Ok(cache) = self.cache.get_mut() {
            cache.clear();
        }
        if let Ok(va_cache) = self.va_cache.get_mut() {
            va_cache.clear();
        }
        if let Ok(map_cache) = self.map_cache.get_mut() {
            map_cache.clear();
        }
        tracing::debug!("device torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;

    fn device() -> Device {
        Device::with_host_backend(DeviceConfig {
            heap_size: 64 * 1024,
            ..DeviceConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_pooled_allocations_reuse_cache() {
        let dev = device();
        let desc = MemoryDesc::pooled(MemoryKind::Local, 4096);

        let first = dev.create_memory(&desc).unwrap();
        let handle = first.native_handle();
        dev.free_memory(first).unwrap();

        let second = dev.create_memory(&desc).unwrap();
        assert_eq!(second.native_handle(), handle);
        assert_eq!(dev.cache_stats().unwrap().hits, 1);
    }

    #[test]
    fn test_dedicated_allocations_skip_cache() {
        let dev = device();
        let res = dev
            .create_memory(&MemoryDesc::dedicated(MemoryKind::Local, 4096))
            .unwrap();
        let handle = res.native_handle();
        dev.free_memory(res).unwrap();

        // The freed resource still lands in the cache (it is cacheable);
        // but a dedicated request must not consume it.
        let again = dev
            .create_memory(&MemoryDesc::dedicated(MemoryKind::Local, 4096))
            .unwrap();
        assert_ne!(again.native_handle(), handle);
    }

    #[test]
    fn test_local_falls_back_to_remote_under_pressure() {
        let backend: Arc<dyn NativeBackend> = Arc::new(HostBackend::with_local_capacity(8 * 1024));
        let dev = Device::new(
            backend,
            DeviceConfig {
                heap_size: 4 * 1024,
                ..DeviceConfig::default()
            },
        )
        .unwrap();

        let res = dev
            .create_memory(&MemoryDesc::dedicated(MemoryKind::Local, 32 * 1024))
            .unwrap();
        assert_eq!(res.kind(), MemoryKind::Remote);
    }

    #[test]
    fn test_heap_is_lazy_and_grows_on_demand() {
        let dev = device();
        assert_eq!(dev.heap_size().unwrap(), 0);

        let a = dev.alloc_heap_block(16 * 1024).unwrap();
        assert_eq!(dev.heap_size().unwrap(), 64 * 1024);

        // Exceeds the remaining space; the heap must grow, not fail.
        let b = dev.alloc_heap_block(128 * 1024).unwrap();
        assert!(dev.heap_size().unwrap() >= 128 * 1024 + 16 * 1024);

        dev.release_heap_block(a).unwrap();
        dev.release_heap_block(b).unwrap();
    }

    #[test]
    fn test_release_before_heap_init_is_an_error() {
        let dev = device();
        let other = device();
        let block = other.alloc_heap_block(256).unwrap();
        assert!(dev.release_heap_block(block).is_err());
    }

    #[test]
    fn test_scratch_via_device_is_monotonic() {
        let dev = device();
        let q = dev.create_queue().unwrap();

        dev.alloc_scratch(&q, 64).unwrap();
        let size = dev.scratch_buffer(&q).unwrap().unwrap().size;

        dev.alloc_scratch(&q, 8).unwrap();
        assert_eq!(dev.scratch_buffer(&q).unwrap().unwrap().size, size);

        dev.alloc_scratch(&q, 512).unwrap();
        assert!(dev.scratch_buffer(&q).unwrap().unwrap().size > size);
    }

    #[test]
    fn test_scratch_reg_num_advances_without_growth() {
        let dev = device();
        let q = dev.create_queue().unwrap();

        // 1 and 128 registers both land in one 64 KiB granule at the
        // default 256 bytes per register.
        dev.alloc_scratch(&q, 1).unwrap();
        let size = dev.scratch_buffer(&q).unwrap().unwrap().size;
        dev.alloc_scratch(&q, 128).unwrap();

        let buf = dev.scratch_buffer(&q).unwrap().unwrap();
        assert_eq!(buf.size, size);
        assert_eq!(buf.reg_num, 128);
    }

    #[test]
    fn test_map_targets_recycle_by_size() {
        let dev = device();
        let small = dev
            .create_memory(&MemoryDesc::dedicated(MemoryKind::HostVisible, 4096))
            .unwrap();
        let big = dev
            .create_memory(&MemoryDesc::dedicated(MemoryKind::HostVisible, 16 * 1024))
            .unwrap();
        let small_handle = small.native_handle();
        let big_handle = big.native_handle();

        assert!(dev.add_map_target(small).unwrap());
        assert!(dev.add_map_target(big).unwrap());
        assert_eq!(dev.map_target_count().unwrap(), 2);

        // Smallest fitting target first, exact match for the second hit.
        let hit = dev.find_map_target(8 * 1024).unwrap().unwrap();
        assert_eq!(hit.native_handle(), big_handle);
        let exact = dev.find_map_target(4096).unwrap().unwrap();
        assert_eq!(exact.native_handle(), small_handle);
        assert!(dev.find_map_target(4096).unwrap().is_none());
    }

    #[test]
    fn test_destroyed_queue_is_unknown_to_scratch() {
        let dev = device();
        let q = dev.create_queue().unwrap();
        dev.destroy_queue(&q).unwrap();

        assert!(matches!(
            dev.alloc_scratch(&q, 4),
            Err(MemForgeError::UnknownQueue(_))
        ));
        assert!(dev.destroy_queue(&q).is_err());
        assert_eq!(dev.queue_count().unwrap(), 0);
    }

    #[test]
    fn test_va_lookup_round_trip() {
        let dev = device();
        let res = dev
            .create_memory(&MemoryDesc::dedicated(MemoryKind::Local, 4096))
            .unwrap();
        dev.add_va_cache(&res).unwrap();

        let (found, offset) = dev
            .find_memory_from_va(res.device_va() + 17)
            .unwrap()
            .unwrap();
        assert!(found.shares_allocation(&res));
        assert_eq!(offset, 17);

        assert!(dev.remove_va_cache(&res).unwrap());
        assert!(dev.find_memory_from_va(res.device_va()).unwrap().is_none());
    }

    #[test]
    fn test_realloc_memory_preserves_prefix() {
        let dev = device();
        let res = dev
            .create_memory(&MemoryDesc::dedicated(MemoryKind::Local, 256))
            .unwrap();
        res.write_from_host(0, &[7u8; 256]).unwrap();

        let grown = dev.realloc_memory(&res, 1024).unwrap();
        assert_eq!(grown.size(), 1024);
        let mut out = [0u8; 256];
        grown.read_to_host(0, &mut out).unwrap();
        assert_eq!(out, [7u8; 256]);

        // Shrink requests hand back the same allocation.
        let same = dev.realloc_memory(&res, 64).unwrap();
        assert!(same.shares_allocation(&res));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = Device::with_host_backend(DeviceConfig {
            heap_size: 0,
            ..DeviceConfig::default()
        })
        .unwrap_err();
        assert!(err.is_user_error());
    }
}
