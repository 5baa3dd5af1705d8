//! Bounded staging buffer pool for host <-> device transfers
//!
//! Copies through the transfer engine stage through host-visible buffers.
//! The pool creates buffers lazily up to a fixed ceiling and blocks
//! acquirers when every buffer is in use; this is the blocking boundary for
//! host-initiated copies when transfer volume exceeds the staging capacity.
//!
//! Reuse is synchronized per buffer: a copy records the work unit that
//! references its buffer with [`XferBuf::record_use`], and release waits for
//! that work alone. A release never waits on unrelated in-flight work, so it
//! cannot deadlock against work that is itself blocked on [`XferBuffers::acquire`].

use std::ops::Deref;
use std::sync::{Arc, Condvar, Mutex};

use crate::backend::NativeBackend;
use crate::device::queue::{VirtualGpu, WorkGuard, WorkTracker};
use crate::error::{MemForgeError, MemResult};
use crate::memory::{MemoryKind, Resource};

/// Maximum number of staging buffers a pool will ever create.
pub const MAX_XFER_BUF_LIST_SIZE: usize = 8;

#[derive(Debug, Default)]
struct XferState {
    free: Vec<Resource>,
    acquired: usize,
    created: usize,
}

#[derive(Debug)]
struct PoolInner {
    backend: Arc<dyn NativeBackend>,
    buf_size: usize,
    state: Mutex<XferState>,
    available: Condvar,
}

impl PoolInner {
    // Called from XferBuf::drop, so poison is recovered rather than returned.
    fn reclaim(&self, buf: Resource) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.acquired -= 1;
        state.free.push(buf);
        tracing::trace!("xfer reclaim: acquired={}", state.acquired);
        drop(state);
        self.available.notify_one();
    }
}

/// Bounded pool of fixed-size staging buffers.
///
/// Invariant: `acquired + free.len() == created <= MAX_XFER_BUF_LIST_SIZE`.
/// A device owns one pool for reads and one for writes.
#[derive(Debug)]
pub struct XferBuffers {
    inner: Arc<PoolInner>,
}

impl XferBuffers {
    pub(crate) fn new(backend: &Arc<dyn NativeBackend>, buf_size: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                backend: Arc::clone(backend),
                buf_size,
                state: Mutex::new(XferState::default()),
                available: Condvar::new(),
            }),
        }
    }

    /// Staging buffer size in bytes.
    pub fn buf_size(&self) -> usize {
        self.inner.buf_size
    }

    /// Number of buffers currently handed out.
    pub fn acquired_count(&self) -> usize {
        match self.inner.state.lock() {
            Ok(state) => state.acquired,
            Err(poisoned) => poisoned.into_inner().acquired,
        }
    }

    /// Take a staging buffer, blocking until one is available.
    ///
    /// Allocates a fresh buffer while the pool is below its ceiling;
    /// otherwise waits on a released one. Waits are unbounded. The only
    /// error path is a failed native allocation for a fresh buffer.
    pub fn acquire(&self) -> MemResult<XferBuf> {
        let mut state = self.inner.state.lock()?;
        loop {
            if let Some(buf) = state.free.pop() {
                state.acquired += 1;
                tracing::trace!("xfer acquire (reuse): acquired={}", state.acquired);
                return Ok(self.handle(buf));
            }
            if state.created < MAX_XFER_BUF_LIST_SIZE {
                let buf =
                    Resource::alloc(&self.inner.backend, MemoryKind::HostVisible, self.inner.buf_size)?;
                state.created += 1;
                state.acquired += 1;
                tracing::debug!(
                    "xfer buffer created: {} bytes ({}/{})",
                    self.inner.buf_size,
                    state.created,
                    MAX_XFER_BUF_LIST_SIZE
                );
                return Ok(self.handle(buf));
            }
            tracing::trace!("xfer acquire: pool exhausted, waiting");
            state = self.inner.available.wait(state)?;
        }
    }

    /// Return a staging buffer on behalf of the queue that used it.
    ///
    /// Waits only for the work recorded against the buffer (see
    /// [`XferBuf::record_use`]), never the queue's whole in-flight set, so
    /// the buffer is not reused while device-side work still references it
    /// and the release cannot form a cycle with blocked acquirers.
    pub fn release(&self, queue: &VirtualGpu, buf: XferBuf) -> MemResult<()> {
        if !Arc::ptr_eq(&buf.pool, &self.inner) {
            // The handle still reclaims into its issuing pool on drop.
            return Err(MemForgeError::Internal(
                "staging buffer released to a pool that did not issue it".into(),
            ));
        }
        if let Some(work) = &buf.last_use {
            work.wait();
        }
        tracing::trace!("xfer release on queue {}", queue.id());
        Ok(()) // buf drops here and rejoins the free list
    }

    fn handle(&self, resource: Resource) -> XferBuf {
        XferBuf {
            pool: Arc::clone(&self.inner),
            resource,
            last_use: None,
        }
    }
}

/// One staging buffer on loan from an [`XferBuffers`] pool.
///
/// Dereferences to the underlying [`Resource`]. Dropping the handle returns
/// the buffer to the pool without waiting on recorded work;
/// [`XferBuffers::release`] is the synchronized path.
#[derive(Debug)]
pub struct XferBuf {
    pool: Arc<PoolInner>,
    resource: Resource,
    last_use: Option<WorkTracker>,
}

impl XferBuf {
    /// Record that `work` references this buffer. The next release waits
    /// for that work to retire before the buffer can be reused.
    pub fn record_use(&mut self, work: &WorkGuard) {
        self.last_use = Some(work.tracker());
    }
}

impl Deref for XferBuf {
    type Target = Resource;

    fn deref(&self) -> &Resource {
        &self.resource
    }
}

impl Drop for XferBuf {
    fn drop(&mut self) {
        // The pool keeps the sole owner once this handle is gone.
        self.pool.reclaim(self.resource.clone());
    }
}
