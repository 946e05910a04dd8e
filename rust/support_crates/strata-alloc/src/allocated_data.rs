//! `AllocatedData`: an owned region of raw memory bound to the allocator that must
//! reclaim it.

use std::{fmt, ptr::NonNull};

use strata_common::{Result, error::Error, verify_arg};

use crate::allocator::Allocator;

/// A move-only handle to `size` bytes obtained from an [`Allocator`].
///
/// The region is returned to its allocator exactly once: on [`reset`](Self::reset) or
/// when the handle is dropped. An empty handle owns nothing and reports a null pointer
/// and a size of 0.
pub struct AllocatedData<'a> {
    allocator: &'a Allocator,
    ptr: Option<NonNull<u8>>,
    size: usize,
}

// The handle is the single owner of its region and the allocator is `Sync`.
unsafe impl Send for AllocatedData<'_> {}
unsafe impl Sync for AllocatedData<'_> {}

impl<'a> AllocatedData<'a> {
    /// Creates a handle that owns nothing.
    pub fn empty(allocator: &'a Allocator) -> AllocatedData<'a> {
        AllocatedData {
            allocator,
            ptr: None,
            size: 0,
        }
    }

    /// Takes ownership of a region previously allocated from `allocator`.
    ///
    /// Fails with `InvalidArgument` if `ptr` is null or `size` is zero.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocator` with exactly `size` bytes, must not
    /// be owned by anything else, and must not be freed other than through the
    /// returned handle.
    pub unsafe fn from_raw_parts(
        allocator: &'a Allocator,
        ptr: *mut u8,
        size: usize,
    ) -> Result<AllocatedData<'a>> {
        let Some(ptr) = NonNull::new(ptr) else {
            return Err(Error::invalid_arg(
                "ptr",
                "AllocatedData constructed with a null pointer",
            ));
        };
        verify_arg!(size, size > 0);
        Ok(AllocatedData {
            allocator,
            ptr: Some(ptr),
            size,
        })
    }

    pub fn allocator(&self) -> &'a Allocator {
        self.allocator
    }

    /// Start of the region, or null for an empty handle.
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
            .map_or(std::ptr::null(), |ptr| ptr.as_ptr() as *const u8)
    }

    /// Start of the region, or null for an empty handle.
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.map_or(std::ptr::null_mut(), NonNull::as_ptr)
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ptr.is_none()
    }

    /// Views the region as bytes.
    ///
    /// # Safety
    ///
    /// Every byte of the region must have been initialized, for example with
    /// [`fill`](Self::fill) or [`copy_from_slice`](Self::copy_from_slice).
    pub unsafe fn as_slice(&self) -> &[u8] {
        match self.ptr {
            Some(ptr) => unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.size) },
            None => &[],
        }
    }

    /// Views the region as mutable bytes.
    ///
    /// # Safety
    ///
    /// Same as [`as_slice`](Self::as_slice).
    pub unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        match self.ptr {
            Some(ptr) => unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.size) },
            None => &mut [],
        }
    }

    /// Sets every byte of the region to `value`.
    pub fn fill(&mut self, value: u8) {
        if let Some(ptr) = self.ptr {
            unsafe { std::ptr::write_bytes(ptr.as_ptr(), value, self.size) };
        }
    }

    /// Copies `src` into the region starting at `offset`.
    ///
    /// Fails with `InvalidArgument` if the range does not fit the region.
    pub fn copy_from_slice(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        let end = offset.checked_add(src.len());
        verify_arg!(src, end.is_some_and(|end| end <= self.size));
        if let Some(ptr) = self.ptr {
            unsafe {
                std::ptr::copy_nonoverlapping(src.as_ptr(), ptr.as_ptr().add(offset), src.len())
            };
        }
        Ok(())
    }

    /// Moves the region out into a new handle, leaving this one empty.
    pub fn take(&mut self) -> AllocatedData<'a> {
        AllocatedData {
            allocator: self.allocator,
            ptr: self.ptr.take(),
            size: std::mem::take(&mut self.size),
        }
    }

    /// Frees the region through the owning allocator and leaves the handle empty.
    ///
    /// Does nothing if the handle is already empty.
    pub fn reset(&mut self) {
        let Some(ptr) = self.ptr.take() else {
            return;
        };
        let size = std::mem::take(&mut self.size);
        unsafe { self.allocator.free_data(ptr.as_ptr(), size) };
    }

    /// Grows or shrinks the region to `new_size` bytes, keeping the first
    /// `min(size, new_size)` bytes.
    ///
    /// An empty handle allocates a fresh region instead. On error the handle keeps its
    /// current region.
    pub fn resize(&mut self, new_size: usize) -> Result<()> {
        let Some(ptr) = self.ptr else {
            let ptr = self.allocator.allocate_data(new_size)?;
            self.ptr = Some(ptr);
            self.size = new_size;
            return Ok(());
        };
        if new_size == self.size {
            return Ok(());
        }
        let reallocated = unsafe {
            self.allocator
                .reallocate_data(ptr.as_ptr(), self.size, new_size)?
        };
        if let Some(new_ptr) = reallocated {
            self.ptr = Some(new_ptr);
            self.size = new_size;
        }
        Ok(())
    }

    /// Releases ownership without freeing, returning the pointer and size.
    ///
    /// The caller becomes responsible for passing both back to
    /// [`Allocator::free_data`].
    pub fn into_raw(mut self) -> (*mut u8, usize) {
        let ptr = self.as_mut_ptr();
        let size = self.size;
        self.ptr = None;
        self.size = 0;
        (ptr, size)
    }
}

impl Drop for AllocatedData<'_> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl fmt::Debug for AllocatedData<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocatedData")
            .field("ptr", &self.as_ptr())
            .field("size", &self.size)
            .field("backend", &self.allocator.backend_name())
            .finish()
    }
}
