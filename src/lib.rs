//! memforge - Device-resident resource manager for GPU compute runtimes
//!
//! Owns a device's global memory heap, recycles device allocations through
//! a size-bucketed cache, arbitrates per-queue scratch memory over one
//! shared store, manages hardware descriptor slots, stages host transfers
//! through a bounded buffer pool, and resolves raw device addresses back to
//! their owning allocations.
//!
//! The native allocator sits behind the [`backend::NativeBackend`] trait:
//! [`backend::HostBackend`] is a real-resource variant for tests and
//! tooling, [`backend::NullBackend`] the offline capability-query variant.

#![allow(clippy::collapsible_else_if)] // Sometimes clearer for control flow
#![allow(clippy::collapsible_if)] // Sometimes clearer for control flow
#![allow(clippy::let_and_return)] // Sometimes clearer for debugging

pub mod backend;
pub mod device;
pub mod error;
pub mod logging;
pub mod memory;

pub use backend::{HostBackend, NativeBackend, NullBackend};
pub use device::{Device, DeviceConfig, MemoryDesc, VirtualGpu};
pub use error::{ErrorCategory, MemForgeError, MemResult};
pub use logging::{init_logging_default, init_logging_from_env, LoggingConfig};
pub use memory::{Heap, HeapBlock, MemoryKind, Resource};
