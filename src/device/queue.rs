//! Compute queue handles and the drain barrier
//!
//! A `VirtualGpu` is the unit of concurrent submission: host threads mark
//! device work in flight with [`VirtualGpu::begin_work`] and the returned
//! guard retires it on drop. [`VirtualGpu::drain`] is the per-queue half of
//! the device-wide stall barrier: it blocks until the in-flight count reaches
//! zero.

use std::sync::{Arc, Condvar, Mutex};

/// One compute queue.
///
/// The in-flight counter models work submitted to the device that may still
/// reference device memory. Heap growth and scratch regrowth wait on it
/// through the stall barrier before moving anything.
#[derive(Debug)]
pub struct VirtualGpu {
    id: usize,
    inflight: Mutex<usize>,
    drained: Condvar,
}

impl VirtualGpu {
    pub(crate) fn new(id: usize) -> Self {
        Self {
            id,
            inflight: Mutex::new(0),
            drained: Condvar::new(),
        }
    }

    /// Stable per-device queue id, also the queue's scratch slot key.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Mark a unit of device work in flight. The work retires when the
    /// returned guard drops.
    pub fn begin_work(self: &Arc<Self>) -> WorkGuard {
        // The counter is a plain usize, so a panicking holder cannot leave
        // it torn; recover the guard rather than propagating the poison.
        let mut count = self
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *count += 1;
        tracing::trace!("queue {}: work submitted, inflight={}", self.id, *count);
        WorkGuard {
            queue: Arc::clone(self),
            done: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Number of work units currently in flight.
    pub fn inflight(&self) -> usize {
        *self
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Block until all in-flight work on this queue has retired.
    pub fn drain(&self) {
        let mut count = self
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while *count > 0 {
            tracing::trace!("queue {}: draining, inflight={}", self.id, *count);
            count = self
                .drained
                .wait(count)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn retire(&self) {
        let mut count = self
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *count -= 1;
        tracing::trace!("queue {}: work retired, inflight={}", self.id, *count);
        if *count == 0 {
            self.drained.notify_all();
        }
    }
}

/// RAII marker for one in-flight work unit.
#[derive(Debug)]
pub struct WorkGuard {
    queue: Arc<VirtualGpu>,
    done: Arc<(Mutex<bool>, Condvar)>,
}

impl WorkGuard {
    /// Completion handle for this work unit alone. Waiters blocked on the
    /// tracker wake when this guard drops, independent of whatever else is
    /// in flight on the queue.
    pub fn tracker(&self) -> WorkTracker {
        WorkTracker {
            state: Arc::clone(&self.done),
        }
    }
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        let (flag, retired) = &*self.done;
        let mut done = flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *done = true;
        drop(done);
        retired.notify_all();
        self.queue.retire();
    }
}

/// Completion handle for one work unit, detached from its [`WorkGuard`].
///
/// Cloneable and waitable after the guard has dropped; this is how the
/// staging pools synchronize on the specific work that touched a buffer
/// without stalling the rest of the queue.
#[derive(Debug, Clone)]
pub struct WorkTracker {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl WorkTracker {
    /// Whether the tracked work unit has retired.
    pub fn is_done(&self) -> bool {
        let (flag, _) = &*self.state;
        *flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Block until the tracked work unit has retired.
    pub fn wait(&self) {
        let (flag, retired) = &*self.state;
        let mut done = flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while !*done {
            done = retired
                .wait(done)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}
