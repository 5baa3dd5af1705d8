//! Resource handle over a single native device allocation

use std::sync::Arc;

use crate::backend::{NativeAllocation, NativeBackend};
use crate::memory::{MemoryError, MemoryKind, MemoryResult};

/// One physical device allocation, buffer- or image-shaped.
///
/// `Resource` clones share the same native allocation through an `Arc`; the
/// allocation is freed exactly once, when the last handle drops. A handle can
/// also be a view: a sub-range of the parent allocation that keeps the parent
/// alive but owns nothing itself.
///
/// Immutable after creation. Reallocation is an explicit device-level
/// operation that produces a new `Resource`.
#[derive(Debug, Clone)]
pub struct Resource {
    inner: Arc<ResourceInner>,
    /// Byte offset into the native allocation (non-zero only for views).
    offset: usize,
    /// Visible length of this handle.
    len: usize,
}

#[derive(Debug)]
struct ResourceInner {
    alloc: NativeAllocation,
    kind: MemoryKind,
    backend: Arc<dyn NativeBackend>,
}

impl Drop for ResourceInner {
    fn drop(&mut self) {
        if let Err(err) = self.backend.free(self.alloc.handle) {
            // Freeing can only fail for a handle the backend no longer knows,
            // which means the bookkeeping above us is broken.
            tracing::error!(
                "failed to free native allocation {}: {}",
                self.alloc.handle,
                err
            );
        }
    }
}

impl Resource {
    /// Allocate a new resource of `kind` with at least `size` bytes.
    pub fn alloc(
        backend: &Arc<dyn NativeBackend>,
        kind: MemoryKind,
        size: usize,
    ) -> MemoryResult<Resource> {
        let alloc = backend.alloc(size, kind.placement())?;
        tracing::trace!(
            "resource alloc: kind={:?} size={} va={:#x}",
            kind,
            size,
            alloc.device_va
        );
        Ok(Resource {
            inner: Arc::new(ResourceInner {
                alloc,
                kind,
                backend: Arc::clone(backend),
            }),
            offset: 0,
            len: size,
        })
    }

    /// Memory type this resource was created with.
    pub fn kind(&self) -> MemoryKind {
        self.inner.kind
    }

    /// Size in bytes visible through this handle.
    pub fn size(&self) -> usize {
        self.len
    }

    /// Device-visible address of the first byte of this handle.
    pub fn device_va(&self) -> u64 {
        self.inner.alloc.device_va + self.offset as u64
    }

    /// Backend handle of the underlying native allocation.
    pub fn native_handle(&self) -> u64 {
        self.inner.alloc.handle
    }

    /// Mapped CPU address, when the placement is host-visible.
    pub fn host_ptr(&self) -> Option<*mut u8> {
        if self.inner.alloc.is_host_visible() {
            // SAFETY: offset is validated against the allocation size at view
            // creation, so the pointer stays inside the mapped range.
            Some(unsafe { self.inner.alloc.host_ptr.add(self.offset) })
        } else {
            None
        }
    }

    /// True for handles produced by [`Resource::view`].
    pub fn is_view(&self) -> bool {
        self.offset != 0 || self.len != self.inner.alloc.size
    }

    /// True when this handle and `other` share the same native allocation.
    pub fn shares_allocation(&self, other: &Resource) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// True when no other handle (clone or view) refers to this allocation.
    pub fn is_sole_owner(&self) -> bool {
        Arc::strong_count(&self.inner) == 1
    }

    /// Create a non-owning view of `[offset, offset + len)` within this
    /// handle. The view keeps the parent allocation alive.
    pub fn view(&self, offset: usize, len: usize) -> MemoryResult<Resource> {
        if offset
            .checked_add(len)
            .map(|end| end > self.len)
            .unwrap_or(true)
        {
            return Err(MemoryError::ViewOutOfBounds {
                offset,
                len,
                size: self.len,
            });
        }
        Ok(Resource {
            inner: Arc::clone(&self.inner),
            offset: self.offset + offset,
            len,
        })
    }

    /// Host-to-device write into this handle's range.
    pub fn write_from_host(&self, offset: usize, data: &[u8]) -> MemoryResult<()> {
        self.check_range(offset, data.len())?;
        self.inner
            .backend
            .upload(self.inner.alloc.handle, self.offset + offset, data)?;
        Ok(())
    }

    /// Device-to-host read out of this handle's range.
    pub fn read_to_host(&self, offset: usize, out: &mut [u8]) -> MemoryResult<()> {
        self.check_range(offset, out.len())?;
        self.inner
            .backend
            .download(self.inner.alloc.handle, self.offset + offset, out)?;
        Ok(())
    }

    /// Device-side copy of `len` bytes from `src` into this handle.
    pub fn copy_from(
        &self,
        dst_offset: usize,
        src: &Resource,
        src_offset: usize,
        len: usize,
    ) -> MemoryResult<()> {
        self.check_range(dst_offset, len)?;
        src.check_range(src_offset, len)?;
        self.inner.backend.copy(
            src.inner.alloc.handle,
            src.offset + src_offset,
            self.inner.alloc.handle,
            self.offset + dst_offset,
            len,
        )?;
        Ok(())
    }

    fn check_range(&self, offset: usize, len: usize) -> MemoryResult<()> {
        if offset
            .checked_add(len)
            .map(|end| end > self.len)
            .unwrap_or(true)
        {
            return Err(MemoryError::ViewOutOfBounds {
                offset,
                len,
                size: self.len,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;

    fn backend() -> Arc<dyn NativeBackend> {
        Arc::new(HostBackend::new())
    }

    #[test]
    fn test_resource_alloc_and_drop_frees() {
        let be = Arc::new(HostBackend::with_local_capacity(8192));
        let dynbe: Arc<dyn NativeBackend> = be.clone();
        let res = Resource::alloc(&dynbe, MemoryKind::Local, 8192).unwrap();
        assert_eq!(res.size(), 8192);
        assert_eq!(be.global_free_memory(), Some(0));
        drop(res);
        assert_eq!(be.global_free_memory(), Some(8192));
    }

    #[test]
    fn test_clone_shares_allocation() {
        let be = backend();
        let res = Resource::alloc(&be, MemoryKind::Local, 128).unwrap();
        let dup = res.clone();
        assert!(res.shares_allocation(&dup));
        assert_eq!(res.device_va(), dup.device_va());
    }

    #[test]
    fn test_view_offsets_and_bounds() {
        let be = backend();
        let res = Resource::alloc(&be, MemoryKind::Local, 1024).unwrap();
        let view = res.view(256, 512).unwrap();
        assert!(view.is_view());
        assert_eq!(view.size(), 512);
        assert_eq!(view.device_va(), res.device_va() + 256);

        // Views of views accumulate offsets.
        let nested = view.view(128, 64).unwrap();
        assert_eq!(nested.device_va(), res.device_va() + 384);

        assert!(res.view(1024, 1).is_err());
        assert!(view.view(256, 512).is_err());
    }

    #[test]
    fn test_view_keeps_parent_alive() {
        let be = Arc::new(HostBackend::with_local_capacity(4096));
        let dynbe: Arc<dyn NativeBackend> = be.clone();
        let res = Resource::alloc(&dynbe, MemoryKind::Local, 4096).unwrap();
        let view = res.view(0, 16).unwrap();
        drop(res);
        assert_eq!(be.global_free_memory(), Some(0));
        drop(view);
        assert_eq!(be.global_free_memory(), Some(4096));
    }

    #[test]
    fn test_host_transfers_respect_view_offset() {
        let be = backend();
        let res = Resource::alloc(&be, MemoryKind::Local, 64).unwrap();
        let view = res.view(32, 16).unwrap();
        view.write_from_host(0, &[7u8; 16]).unwrap();

        let mut out = [0u8; 16];
        res.read_to_host(32, &mut out).unwrap();
        assert_eq!(out, [7u8; 16]);
    }

    #[test]
    fn test_host_ptr_only_for_host_visible() {
        let be = backend();
        let local = Resource::alloc(&be, MemoryKind::Local, 64).unwrap();
        assert!(local.host_ptr().is_none());
        let staging = Resource::alloc(&be, MemoryKind::HostVisible, 64).unwrap();
        assert!(staging.host_ptr().is_some());
    }
}
