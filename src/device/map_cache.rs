//! Reusable host map-target buffers
//!
//! Mapping device-resident memory for host access stages through a
//! host-visible buffer. Tearing that buffer down on every unmap wastes
//! allocations, so finished map targets are parked here and handed back by
//! size. The cache is guarded by its own leaf lock on the device.

use crate::memory::Resource;

/// Parked map targets kept beyond this count start displacing each other.
const MAP_CACHE_MAX_ENTRIES: usize = 8;

/// Size-matched pool of idle map-target buffers.
#[derive(Debug, Default)]
pub(crate) struct MapCache {
    entries: Vec<Resource>,
}

impl MapCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Best parked target for a `size`-byte mapping: an exact-size entry
    /// when present, otherwise the smallest entry that still fits.
    ///
    /// When nothing fits and the cache is full, the largest entry is
    /// dropped so its memory is free for the buffer the caller allocates
    /// instead.
    pub(crate) fn find(&mut self, size: usize) -> Option<Resource> {
        if size == 0 {
            return None;
        }
        let mut best: Option<usize> = None;
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.size() == size {
                best = Some(i);
                break;
            }
            if entry.size() > size
                && best.map_or(true, |b| entry.size() < self.entries[b].size())
            {
                best = Some(i);
            }
        }
        if let Some(i) = best {
            let hit = self.entries.swap_remove(i);
            tracing::trace!(
                "map target reused: {} bytes for a {} byte mapping",
                hit.size(),
                size
            );
            return Some(hit);
        }
        if self.entries.len() >= MAP_CACHE_MAX_ENTRIES {
            if let Some(i) = (0..self.entries.len()).max_by_key(|&i| self.entries[i].size()) {
                let evicted = self.entries.swap_remove(i);
                tracing::debug!("map cache full: dropping {} byte target", evicted.size());
            }
        }
        None
    }

    /// Park a finished map target for reuse. Returns whether it was kept;
    /// rejected targets (views, shared handles, empty buffers) drop and
    /// free their memory.
    pub(crate) fn add(&mut self, target: Resource) -> bool {
        if target.is_view() || !target.is_sole_owner() || target.size() == 0 {
            return false;
        }
        self.entries.push(target);
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
