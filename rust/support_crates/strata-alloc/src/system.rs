//! Backends that delegate to a process-wide `GlobalAlloc`: the platform allocator and
//! mimalloc. Both are internally thread-safe, so no locking is added here.

use std::alloc::{GlobalAlloc, Layout, System};

use mimalloc::MiMalloc;

use crate::{BACKEND_ALIGNMENT, backend::AllocatorBackend};

#[inline]
fn layout(size: usize) -> Option<Layout> {
    Layout::from_size_align(size, BACKEND_ALIGNMENT).ok()
}

#[inline]
fn global_allocate<A: GlobalAlloc>(alloc: &A, size: usize) -> *mut u8 {
    match layout(size) {
        Some(layout) => unsafe { alloc.alloc(layout) },
        None => std::ptr::null_mut(),
    }
}

#[inline]
unsafe fn global_free<A: GlobalAlloc>(alloc: &A, ptr: *mut u8, size: usize) {
    if let Some(layout) = layout(size) {
        unsafe { alloc.dealloc(ptr, layout) }
    }
}

#[inline]
unsafe fn global_reallocate<A: GlobalAlloc>(
    alloc: &A,
    ptr: *mut u8,
    old_size: usize,
    new_size: usize,
) -> *mut u8 {
    // `GlobalAlloc::realloc` requires the new size, rounded up to the alignment,
    // to stay within `isize::MAX`.
    if layout(new_size).is_none() {
        return std::ptr::null_mut();
    }
    match layout(old_size) {
        Some(old_layout) => unsafe { alloc.realloc(ptr, old_layout, new_size) },
        None => std::ptr::null_mut(),
    }
}

/// Delegates to the platform allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBackend;

impl SystemBackend {
    pub fn new() -> SystemBackend {
        SystemBackend
    }
}

unsafe impl AllocatorBackend for SystemBackend {
    fn name(&self) -> &'static str {
        "system"
    }

    fn allocate(&self, size: usize) -> *mut u8 {
        global_allocate(&System, size)
    }

    unsafe fn free(&self, ptr: *mut u8, size: usize) {
        unsafe { global_free(&System, ptr, size) }
    }

    unsafe fn reallocate(&self, ptr: *mut u8, old_size: usize, new_size: usize) -> *mut u8 {
        unsafe { global_reallocate(&System, ptr, old_size, new_size) }
    }
}

/// Delegates to mimalloc, without installing it as the global allocator.
pub struct HighPerformanceBackend {
    inner: MiMalloc,
}

impl HighPerformanceBackend {
    pub fn new() -> HighPerformanceBackend {
        HighPerformanceBackend { inner: MiMalloc }
    }
}

impl Default for HighPerformanceBackend {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl AllocatorBackend for HighPerformanceBackend {
    fn name(&self) -> &'static str {
        "mimalloc"
    }

    fn allocate(&self, size: usize) -> *mut u8 {
        global_allocate(&self.inner, size)
    }

    unsafe fn free(&self, ptr: *mut u8, size: usize) {
        unsafe { global_free(&self.inner, ptr, size) }
    }

    unsafe fn reallocate(&self, ptr: *mut u8, old_size: usize, new_size: usize) -> *mut u8 {
        unsafe { global_reallocate(&self.inner, ptr, old_size, new_size) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(backend: &dyn AllocatorBackend) {
        let ptr = backend.allocate(100);
        assert!(!ptr.is_null());
        assert!((ptr as usize).is_multiple_of(BACKEND_ALIGNMENT));
        unsafe {
            for i in 0..100 {
                *ptr.add(i) = i as u8;
            }
            let grown = backend.reallocate(ptr, 100, 4000);
            assert!(!grown.is_null());
            for i in 0..100 {
                assert_eq!(*grown.add(i), i as u8);
            }
            backend.free(grown, 4000);
        }
    }

    #[test]
    fn test_system_backend() {
        exercise(&SystemBackend::new());
    }

    #[test]
    fn test_high_performance_backend() {
        exercise(&HighPerformanceBackend::new());
    }

    #[test]
    fn test_oversized_request_returns_null() {
        let backend = SystemBackend::new();
        assert!(backend.allocate(usize::MAX).is_null());
    }
}
