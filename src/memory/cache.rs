//! Idle resource cache
//!
//! Freed resources are parked here keyed by kind and size so the next
//! allocation of a matching shape skips the native allocator. The cache holds
//! the only reference to each parked resource; dropping an entry returns the
//! memory to the device.

use std::collections::{BTreeMap, VecDeque};

use crate::memory::{MemoryKind, Resource};

/// Counters exposed for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
    pub cached_bytes: u64,
    pub cached_count: u64,
}

/// Size-bucketed cache of idle device resources.
///
/// Buckets are keyed `(kind, size)`; within a bucket reuse is FIFO. An
/// acquire may be satisfied by a moderately larger resource (bounded
/// over-provisioning) to cut fragmentation-driven misses. Total cached bytes
/// never exceed the configured ceiling; the oldest entries of the largest
/// buckets are evicted first.
#[derive(Debug)]
pub struct ResourceCache {
    buckets: BTreeMap<(MemoryKind, usize), VecDeque<Resource>>,
    cache_size: u64,
    max_cache_size: u64,
    stats: CacheStats,
}

impl ResourceCache {
    /// A cached resource may be up to this many times larger than the
    /// request it satisfies.
    const OVERPROVISION_NUM: usize = 2;

    pub fn new(max_cache_size: u64) -> Self {
        Self {
            buckets: BTreeMap::new(),
            cache_size: 0,
            max_cache_size,
            stats: CacheStats::default(),
        }
    }

    /// Bytes currently parked in the cache.
    pub fn cache_size(&self) -> u64 {
        self.cache_size
    }

    pub fn max_cache_size(&self) -> u64 {
        self.max_cache_size
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats;
        stats.cached_bytes = self.cache_size;
        stats.cached_count = self.buckets.values().map(|q| q.len() as u64).sum();
        stats
    }

    /// Take a cached resource of `kind` that can hold `size` bytes.
    ///
    /// Exact-size entries win; otherwise the smallest entry within the
    /// over-provision bound is reused. Returns `None` on a miss.
    pub fn acquire(&mut self, kind: MemoryKind, size: usize) -> Option<Resource> {
        if size == 0 {
            return None;
        }
        let limit = size.saturating_mul(Self::OVERPROVISION_NUM);
        let key = self
            .buckets
            .range((kind, size)..=(kind, limit))
            .find(|(_, queue)| !queue.is_empty())
            .map(|(key, _)| *key);

        match key {
            Some(key) => {
                let queue = self.buckets.get_mut(&key)?;
                let resource = queue.pop_front()?;
                if queue.is_empty() {
                    self.buckets.remove(&key);
                }
                self.cache_size -= resource.size() as u64;
                self.stats.hits += 1;
                tracing::trace!(
                    "cache hit: kind={:?} requested={} reused={}",
                    kind,
                    size,
                    resource.size()
                );
                Some(resource)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Park an idle resource for reuse.
    ///
    /// Returns `false` when the resource is not cacheable (views, shared
    /// handles, oversized entries); it is dropped and freed instead. May
    /// evict older entries to stay under the byte ceiling.
    pub fn release(&mut self, resource: Resource) -> bool {
        let size = resource.size() as u64;
        if resource.is_view() || !resource.is_sole_owner() {
            return false;
        }
        if size == 0 || size > self.max_cache_size {
            return false;
        }

        while self.cache_size + size > self.max_cache_size {
            if !self.evict_one() {
                return false;
            }
        }

        let key = (resource.kind(), resource.size());
        self.cache_size += size;
        self.stats.inserts += 1;
        self.buckets.entry(key).or_default().push_back(resource);
        true
    }

    /// Drop cached entries until at most `target_bytes` remain.
    pub fn trim(&mut self, target_bytes: u64) {
        while self.cache_size > target_bytes {
            if !self.evict_one() {
                break;
            }
        }
        tracing::debug!("cache trimmed to {} bytes", self.cache_size);
    }

    /// Drop everything. Used at device teardown and under memory pressure.
    pub fn clear(&mut self) {
        let dropped = self.buckets.values().map(|q| q.len() as u64).sum::<u64>();
        self.stats.evictions += dropped;
        self.buckets.clear();
        self.cache_size = 0;
    }

    /// Evict the oldest entry of the largest bucket. Returns `false` when
    /// the cache is already empty.
    fn evict_one(&mut self) -> bool {
        let key = match self.buckets.keys().next_back() {
            Some(key) => *key,
            None => return false,
        };
        let mut evicted = false;
        if let Some(queue) = self.buckets.get_mut(&key) {
            if let Some(resource) = queue.pop_front() {
                self.cache_size -= resource.size() as u64;
                self.stats.evictions += 1;
                evicted = true;
                tracing::trace!(
                    "cache evict: kind={:?} size={}",
                    resource.kind(),
                    resource.size()
                );
            }
            if queue.is_empty() {
                self.buckets.remove(&key);
            }
        }
        evicted
    }
}
