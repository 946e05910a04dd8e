//! Pluggable raw-memory allocation for the Strata engine.
//!
//! An [`Allocator`] binds one [`AllocatorBackend`] (the platform allocator, a locked
//! pool, or mimalloc) to optional debug instrumentation that counts outstanding bytes
//! and, in extended mode, remembers the stack trace behind every live pointer.
//! [`AllocatedData`] is the owned handle that returns a region to the allocator that
//! produced it when dropped.
//!
//! Every free and reallocate call must pass the exact size most recently associated
//! with the pointer: backends are not self-describing.

pub mod allocated_data;
pub mod allocator;
pub mod backend;
pub mod config;
pub mod debug_info;
pub mod pool;
pub mod system;

pub use allocated_data::AllocatedData;
pub use allocator::Allocator;
pub use backend::{AllocatorBackend, BackendKind, create_backend};
pub use config::{AllocatorConfig, DebugMode, PoolConfig};
pub use debug_info::LeakedAllocation;
pub use pool::{PoolStats, PooledBackend};
pub use system::{HighPerformanceBackend, SystemBackend};

/// Upper bound (exclusive) on the size of a single allocation.
#[cfg(target_pointer_width = "64")]
pub const MAXIMUM_ALLOC_SIZE: usize = 1 << 48;

/// Upper bound (exclusive) on the size of a single allocation.
#[cfg(not(target_pointer_width = "64"))]
pub const MAXIMUM_ALLOC_SIZE: usize = isize::MAX as usize;

/// Alignment guaranteed by every backend for the regions it returns.
pub const BACKEND_ALIGNMENT: usize = 16;
