//! Offline capability-query backend
//!
//! The stub variant used when no hardware is present: a device built on it
//! answers configuration queries, but every allocation fails and the free
//! memory query reports unsupported.

use crate::backend::{NativeAllocation, NativeBackend, NativeError, NativeResult, Placement};

#[derive(Debug, Default)]
pub struct NullBackend;

impl NullBackend {
    pub fn new() -> Self {
        NullBackend
    }
}

impl NativeBackend for NullBackend {
    fn alloc(&self, _size: usize, _placement: Placement) -> NativeResult<NativeAllocation> {
        Err(NativeError::Unsupported("offline device cannot allocate"))
    }

    fn free(&self, handle: u64) -> NativeResult<()> {
        Err(NativeError::InvalidHandle(handle))
    }

    fn copy(
        &self,
        _src: u64,
        _src_offset: usize,
        _dst: u64,
        _dst_offset: usize,
        _len: usize,
    ) -> NativeResult<()> {
        Err(NativeError::Unsupported("offline device cannot copy"))
    }

    fn upload(&self, _dst: u64, _dst_offset: usize, _data: &[u8]) -> NativeResult<()> {
        Err(NativeError::Unsupported("offline device cannot upload"))
    }

    fn download(&self, _src: u64, _src_offset: usize, _out: &mut [u8]) -> NativeResult<()> {
        Err(NativeError::Unsupported("offline device cannot download"))
    }

    fn global_free_memory(&self) -> Option<u64> {
        None
    }
}
