//! The `Allocator` front end and the process-wide default instance.

use std::{fmt, ptr::NonNull, sync::OnceLock};

use strata_common::{Result, error::Error};

use crate::{
    MAXIMUM_ALLOC_SIZE,
    allocated_data::AllocatedData,
    backend::{AllocatorBackend, create_backend},
    config::{AllocatorConfig, DebugMode},
    debug_info::{AllocatorDebugInfo, LeakedAllocation},
    system::SystemBackend,
};

static DEFAULT_ALLOCATOR: OnceLock<Allocator> = OnceLock::new();

/// Front end shared by every consumer of raw memory: enforces the allocation size
/// ceiling, turns backend exhaustion into errors and feeds the debug bookkeeping.
///
/// An `Allocator` is meant to live as long as the buffers it hands out and to be
/// shared by reference; it is `Send + Sync` and may be used from many threads at once.
pub struct Allocator {
    backend: Box<dyn AllocatorBackend>,
    debug_info: Option<AllocatorDebugInfo>,
}

impl Allocator {
    /// Creates an allocator over the backend selected by `config`.
    pub fn new(config: AllocatorConfig) -> Result<Allocator> {
        config.validate()?;
        let backend = create_backend(config.backend, &config.pool)?;
        Ok(Self::with_backend(backend, config.debug))
    }

    /// Creates an allocator over an explicitly constructed backend.
    pub fn with_backend(backend: Box<dyn AllocatorBackend>, debug: DebugMode) -> Allocator {
        log::debug!(
            "creating allocator: backend={}, debug={debug}",
            backend.name()
        );
        Allocator {
            backend,
            debug_info: AllocatorDebugInfo::new(debug),
        }
    }

    /// Returns the process-wide allocator, creating it on first access.
    ///
    /// The configuration comes from [`configure_default`](Self::configure_default) if
    /// that was called first, otherwise from [`AllocatorConfig::from_env`].
    ///
    /// The default allocator is never dropped, so its teardown leak check does not run
    /// on its own; call [`check_leaks`](Self::check_leaks) on it at shutdown instead.
    pub fn default_allocator() -> &'static Allocator {
        DEFAULT_ALLOCATOR.get_or_init(|| {
            let config = AllocatorConfig::from_env().unwrap_or_else(|e| {
                log::warn!("ignoring invalid allocator environment configuration: {e}");
                AllocatorConfig::default()
            });
            match create_backend(config.backend, &config.pool) {
                Ok(backend) => Allocator::with_backend(backend, config.debug),
                Err(e) => {
                    log::warn!("falling back to the system allocator: {e}");
                    Allocator::with_backend(Box::new(SystemBackend::new()), config.debug)
                }
            }
        })
    }

    /// Installs the configuration of the process-wide allocator.
    ///
    /// Fails with `InvalidOperation` once the default allocator has been created.
    pub fn configure_default(config: AllocatorConfig) -> Result<&'static Allocator> {
        let allocator = Allocator::new(config)?;
        if DEFAULT_ALLOCATOR.set(allocator).is_err() {
            return Err(Error::invalid_operation(
                "configure_default: default allocator already initialized",
            ));
        }
        Ok(Self::default_allocator())
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn debug_mode(&self) -> DebugMode {
        self.debug_info
            .as_ref()
            .map_or(DebugMode::Disabled, AllocatorDebugInfo::mode)
    }

    /// Bytes allocated through this allocator and not yet freed.
    ///
    /// `None` when debug bookkeeping is disabled.
    pub fn outstanding_bytes(&self) -> Option<u64> {
        self.debug_info
            .as_ref()
            .map(AllocatorDebugInfo::outstanding_bytes)
    }

    /// Lists the live allocations with their stack traces.
    ///
    /// Always empty unless the allocator runs in [`DebugMode::Extended`].
    pub fn leak_report(&self) -> Vec<LeakedAllocation> {
        self.debug_info
            .as_ref()
            .map(AllocatorDebugInfo::leaks)
            .unwrap_or_default()
    }

    /// Runs the teardown leak check without dropping the allocator.
    ///
    /// Panics with the leak report (one entry per live allocation in extended mode) if
    /// any bytes are outstanding. Does nothing when debug bookkeeping is disabled.
    pub fn check_leaks(&self) {
        if let Some(debug_info) = &self.debug_info {
            debug_info.check_leaks();
        }
    }

    /// Allocates a region of `size` bytes.
    ///
    /// Fails with `SizeLimitExceeded` when `size` is zero or not below
    /// [`MAXIMUM_ALLOC_SIZE`], without calling the backend, and with `OutOfMemory` when
    /// the backend is exhausted. The contents of the region are uninitialized.
    pub fn allocate_data(&self, size: usize) -> Result<NonNull<u8>> {
        check_size(size)?;
        let Some(ptr) = NonNull::new(self.backend.allocate(size)) else {
            log::warn!(
                "{} backend failed to allocate {size} bytes",
                self.backend.name()
            );
            return Err(Error::out_of_memory(size));
        };
        if let Some(debug_info) = &self.debug_info {
            debug_info.allocate_data(ptr, size);
        }
        Ok(ptr)
    }

    /// Returns a region to the backend. A null `ptr` is a no-op.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must have been returned by [`allocate_data`](Self::allocate_data)
    /// or [`reallocate_data`](Self::reallocate_data) on this allocator and not freed
    /// since; `size` must be the size it was most recently (re)allocated with. With
    /// debug bookkeeping enabled, violations panic; otherwise they are undefined
    /// behavior.
    pub unsafe fn free_data(&self, ptr: *mut u8, size: usize) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };
        if let Some(debug_info) = &self.debug_info {
            debug_info.free_data(ptr, size);
        }
        unsafe { self.backend.free(ptr.as_ptr(), size) };
    }

    /// Moves a region to one of `new_size` bytes, preserving the first
    /// `min(old_size, new_size)` bytes. Bytes past `old_size` are uninitialized.
    ///
    /// A null `ptr` yields `Ok(None)` without touching the backend. On error the
    /// original region stays valid and owned by the caller.
    ///
    /// # Safety
    ///
    /// Same requirements on `ptr` and `old_size` as [`free_data`](Self::free_data). On
    /// success `ptr` must no longer be used.
    pub unsafe fn reallocate_data(
        &self,
        ptr: *mut u8,
        old_size: usize,
        new_size: usize,
    ) -> Result<Option<NonNull<u8>>> {
        let Some(ptr) = NonNull::new(ptr) else {
            return Ok(None);
        };
        check_size(new_size)?;
        let record = self
            .debug_info
            .as_ref()
            .and_then(|debug_info| debug_info.free_data(ptr, old_size));
        let new_ptr = unsafe { self.backend.reallocate(ptr.as_ptr(), old_size, new_size) };
        match NonNull::new(new_ptr) {
            Some(new_ptr) => {
                if let Some(debug_info) = &self.debug_info {
                    debug_info.allocate_data(new_ptr, new_size);
                }
                Ok(Some(new_ptr))
            }
            None => {
                if let Some(debug_info) = &self.debug_info {
                    debug_info.restore(ptr, old_size, record);
                }
                log::warn!(
                    "{} backend failed to reallocate {old_size} -> {new_size} bytes",
                    self.backend.name()
                );
                Err(Error::out_of_memory(new_size))
            }
        }
    }

    /// Allocates `size` bytes wrapped in an owned buffer that frees itself on drop.
    pub fn allocate(&self, size: usize) -> Result<AllocatedData<'_>> {
        let ptr = self.allocate_data(size)?;
        unsafe { AllocatedData::from_raw_parts(self, ptr.as_ptr(), size) }
    }
}

impl fmt::Debug for Allocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator")
            .field("backend", &self.backend.name())
            .field("debug", &self.debug_mode())
            .field("outstanding_bytes", &self.outstanding_bytes())
            .finish()
    }
}

#[inline]
fn check_size(size: usize) -> Result<()> {
    if size == 0 || size >= MAXIMUM_ALLOC_SIZE {
        return Err(Error::size_limit_exceeded(size, MAXIMUM_ALLOC_SIZE));
    }
    Ok(())
}
