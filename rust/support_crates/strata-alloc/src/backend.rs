//! The three-operation contract every concrete allocation strategy implements.

use std::{fmt, str::FromStr};

use strata_common::{Result, error::Error};

use crate::{
    config::PoolConfig,
    pool::PooledBackend,
    system::{HighPerformanceBackend, SystemBackend},
};

/// A concrete allocation strategy: allocate, free and reallocate raw byte regions.
///
/// The backend's own fields are its private context; nothing outside these three
/// operations touches them.
///
/// # Safety
///
/// Implementors must guarantee that:
/// - A non-null pointer returned by `allocate` or `reallocate` addresses at least the
///   requested number of bytes, aligned to [`BACKEND_ALIGNMENT`](crate::BACKEND_ALIGNMENT),
///   valid for reads and writes until it is passed to `free` or `reallocate`.
/// - A successful `reallocate` preserves the first `min(old_size, new_size)` bytes.
/// - A failed `reallocate` (null result) leaves the original region valid and unreleased.
/// - All operations are safe to call concurrently from multiple threads.
pub unsafe trait AllocatorBackend: Send + Sync {
    /// Short diagnostic name of the strategy.
    fn name(&self) -> &'static str;

    /// Returns a region of at least `size` bytes, or null on exhaustion.
    ///
    /// `size` is always non-zero.
    fn allocate(&self, size: usize) -> *mut u8;

    /// Releases a region previously returned by this backend.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` or `reallocate` on this backend,
    /// must not have been released since, and `size` must be the size most recently
    /// associated with it.
    unsafe fn free(&self, ptr: *mut u8, size: usize);

    /// Moves a region to one of at least `new_size` bytes.
    ///
    /// Bytes beyond `old_size` in a grown region are left uninitialized.
    ///
    /// # Safety
    ///
    /// Same requirements on `ptr` and `old_size` as [`free`](Self::free). `new_size`
    /// is non-zero. On success `ptr` must no longer be used.
    unsafe fn reallocate(&self, ptr: *mut u8, old_size: usize, new_size: usize) -> *mut u8;
}

/// The closed set of backends a configuration can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendKind {
    /// The platform allocator.
    #[default]
    System,
    /// A dedicated pool behind a single lock.
    Pooled,
    /// mimalloc.
    HighPerformance,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::System => "system",
            BackendKind::Pooled => "pooled",
            BackendKind::HighPerformance => "high_performance",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" | "default" => Ok(BackendKind::System),
            "pooled" | "pool" => Ok(BackendKind::Pooled),
            "high_performance" | "high-performance" | "mimalloc" => {
                Ok(BackendKind::HighPerformance)
            }
            other => Err(Error::invalid_arg(
                "backend",
                format!("unknown allocator backend '{other}'"),
            )),
        }
    }
}

/// Constructs the backend selected by `kind`.
///
/// `pool` is only consulted for [`BackendKind::Pooled`].
pub fn create_backend(kind: BackendKind, pool: &PoolConfig) -> Result<Box<dyn AllocatorBackend>> {
    let backend: Box<dyn AllocatorBackend> = match kind {
        BackendKind::System => Box::new(SystemBackend::new()),
        BackendKind::Pooled => Box::new(PooledBackend::new(pool.clone())?),
        BackendKind::HighPerformance => Box::new(HighPerformanceBackend::new()),
    };
    Ok(backend)
}
