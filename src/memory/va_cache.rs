//! Device address to resource lookup
//!
//! Maps device address ranges back to the resources that own them so a raw
//! pointer captured by a queue can be resolved to its backing allocation.
//! Backed by an ordered map keyed on range start; a lookup finds the
//! predecessor entry and checks containment, so hits and misses are both one
//! `O(log n)` probe.

use std::collections::BTreeMap;

use crate::memory::{MemoryError, MemoryResult, Resource};

#[derive(Debug)]
struct VaRange {
    end: u64,
    resource: Resource,
}

/// Ordered map from device address ranges to resources.
#[derive(Debug, Default)]
pub struct VaCache {
    ranges: BTreeMap<u64, VaRange>,
}

impl VaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Register a resource's device address range.
    ///
    /// Zero-sized resources are ignored. Overlapping an existing entry is an
    /// error: two resources claiming the same device address means a
    /// bookkeeping bug upstream.
    pub fn add(&mut self, resource: &Resource) -> MemoryResult<()> {
        let start = resource.device_va();
        let size = resource.size() as u64;
        if size == 0 {
            return Ok(());
        }
        let end = start + size;

        if let Some((_, range)) = self.ranges.range(..end).next_back() {
            if range.end > start {
                return Err(MemoryError::VaRangeOverlap { start, end });
            }
        }

        tracing::trace!("va cache add: [{:#x}, {:#x})", start, end);
        self.ranges.insert(
            start,
            VaRange {
                end,
                resource: resource.clone(),
            },
        );
        Ok(())
    }

    /// Drop the entry for `resource`, if present. Returns whether an entry
    /// was removed.
    pub fn remove(&mut self, resource: &Resource) -> bool {
        let start = resource.device_va();
        match self.ranges.get(&start) {
            Some(range) if range.resource.shares_allocation(resource) => {
                self.ranges.remove(&start);
                tracing::trace!("va cache remove: start={:#x}", start);
                true
            }
            _ => false,
        }
    }

    /// Resolve a device address to its owning resource and the byte offset
    /// within it. Returns `None` when no registered range contains `va`.
    pub fn find(&self, va: u64) -> Option<(Resource, u64)> {
        let (start, range) = self.ranges.range(..=va).next_back()?;
        if va < range.end {
            Some((range.resource.clone(), va - start))
        } else {
            None
        }
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.ranges.clear();
    }
}
