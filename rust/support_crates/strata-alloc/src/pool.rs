//! A pooled backend: power-of-two size classes carved out of large chunks reserved
//! from the system allocator, with one lock serializing every operation.
//!
//! Blocks up to [`MAX_POOL_CLASS_SIZE`] are bump-allocated from the current chunk and
//! recycled through per-class free lists; freed blocks are never returned to the
//! system before the backend itself is dropped. Larger requests are passed straight
//! to the system allocator (still under the pool lock) so that the optional capacity
//! bound covers them too; they are tracked so that dropping the backend releases any
//! still outstanding.

use std::{
    alloc::{GlobalAlloc, Layout, System},
    ptr::NonNull,
};

use ahash::AHashMap;
use parking_lot::Mutex;
use strata_common::Result;

use crate::{
    BACKEND_ALIGNMENT,
    backend::AllocatorBackend,
    config::{MAX_POOL_CLASS_SIZE, MIN_POOL_CLASS_SIZE, PoolConfig},
};

const NUM_CLASSES: usize =
    (MAX_POOL_CLASS_SIZE.trailing_zeros() - MIN_POOL_CLASS_SIZE.trailing_zeros() + 1) as usize;

#[inline]
fn size_class(size: usize) -> Option<usize> {
    if size > MAX_POOL_CLASS_SIZE {
        return None;
    }
    let rounded = size.max(MIN_POOL_CLASS_SIZE).next_power_of_two();
    Some((rounded.trailing_zeros() - MIN_POOL_CLASS_SIZE.trailing_zeros()) as usize)
}

#[inline]
fn class_size(class: usize) -> usize {
    MIN_POOL_CLASS_SIZE << class
}

#[inline]
fn layout(size: usize) -> Option<Layout> {
    Layout::from_size_align(size, BACKEND_ALIGNMENT).ok()
}

/// Point-in-time usage figures of a [`PooledBackend`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of chunks reserved from the system.
    pub chunk_count: usize,
    /// Bytes reserved from the system, chunks and large blocks included.
    pub reserved_bytes: usize,
    /// Bytes currently handed out, rounded up to the size class.
    pub in_use_bytes: usize,
    /// Freed blocks waiting for reuse across all size classes.
    pub cached_blocks: usize,
    /// Outstanding blocks above the largest size class.
    pub large_blocks: usize,
}

struct Chunk {
    ptr: NonNull<u8>,
    layout: Layout,
}

struct Pool {
    config: PoolConfig,
    chunks: Vec<Chunk>,
    /// Offset of the first unused byte in the last chunk.
    cursor: usize,
    free_lists: [Vec<NonNull<u8>>; NUM_CLASSES],
    /// Blocks served directly by the system, keyed by address.
    large: AHashMap<usize, Layout>,
    reserved: usize,
    in_use: usize,
}

// The pool only hands out raw addresses; it is moved between threads under the lock.
unsafe impl Send for Pool {}

impl Pool {
    fn new(config: PoolConfig) -> Pool {
        Pool {
            config,
            chunks: Vec::new(),
            cursor: 0,
            free_lists: std::array::from_fn(|_| Vec::new()),
            large: AHashMap::new(),
            reserved: 0,
            in_use: 0,
        }
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            chunk_count: self.chunks.len(),
            reserved_bytes: self.reserved,
            in_use_bytes: self.in_use,
            cached_blocks: self.free_lists.iter().map(Vec::len).sum(),
            large_blocks: self.large.len(),
        }
    }

    fn allocate(&mut self, size: usize) -> *mut u8 {
        match size_class(size) {
            Some(class) => self.allocate_block(class),
            None => self.allocate_large(size),
        }
    }

    fn allocate_block(&mut self, class: usize) -> *mut u8 {
        let block_size = class_size(class);
        if let Some(ptr) = self.free_lists[class].pop() {
            self.in_use += block_size;
            return ptr.as_ptr();
        }
        if self.remaining() < block_size {
            self.retire_tail();
            if !self.add_chunk() {
                return std::ptr::null_mut();
            }
        }
        let Some(chunk) = self.chunks.last() else {
            return std::ptr::null_mut();
        };
        let ptr = unsafe { chunk.ptr.as_ptr().add(self.cursor) };
        self.cursor += block_size;
        self.in_use += block_size;
        ptr
    }

    fn allocate_large(&mut self, size: usize) -> *mut u8 {
        if !self.can_reserve(size) {
            return std::ptr::null_mut();
        }
        let Some(layout) = layout(size) else {
            return std::ptr::null_mut();
        };
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            self.large.insert(ptr as usize, layout);
            self.reserved += size;
            self.in_use += size;
        }
        ptr
    }

    unsafe fn free(&mut self, ptr: *mut u8, size: usize) {
        let Some(block) = NonNull::new(ptr) else {
            return;
        };
        match size_class(size) {
            Some(class) => {
                self.free_lists[class].push(block);
                self.in_use -= class_size(class);
            }
            None => {
                if let Some(layout) = self.large.remove(&(ptr as usize)) {
                    unsafe { System.dealloc(ptr, layout) };
                    self.reserved -= layout.size();
                    self.in_use -= layout.size();
                }
            }
        }
    }

    unsafe fn reallocate(&mut self, ptr: *mut u8, old_size: usize, new_size: usize) -> *mut u8 {
        if let (Some(old_class), Some(new_class)) = (size_class(old_size), size_class(new_size)) {
            if old_class == new_class {
                return ptr;
            }
        }
        let new_ptr = self.allocate(new_size);
        if new_ptr.is_null() {
            return new_ptr;
        }
        unsafe {
            std::ptr::copy_nonoverlapping(ptr, new_ptr, old_size.min(new_size));
            self.free(ptr, old_size);
        }
        new_ptr
    }

    fn remaining(&self) -> usize {
        if self.chunks.is_empty() {
            0
        } else {
            self.config.chunk_size - self.cursor
        }
    }

    /// Hands the unused end of the current chunk to the free lists of the classes that
    /// fit it, largest first.
    fn retire_tail(&mut self) {
        let Some(base) = self.chunks.last().map(|chunk| chunk.ptr) else {
            return;
        };
        let mut remaining = self.remaining();
        while remaining >= MIN_POOL_CLASS_SIZE {
            let class = (0..NUM_CLASSES)
                .rev()
                .find(|&class| class_size(class) <= remaining)
                .unwrap_or(0);
            let block_size = class_size(class);
            let block = unsafe { NonNull::new_unchecked(base.as_ptr().add(self.cursor)) };
            self.free_lists[class].push(block);
            self.cursor += block_size;
            remaining -= block_size;
        }
    }

    fn add_chunk(&mut self) -> bool {
        let chunk_size = self.config.chunk_size;
        if !self.can_reserve(chunk_size) {
            return false;
        }
        let Some(layout) = layout(chunk_size) else {
            return false;
        };
        let Some(ptr) = NonNull::new(unsafe { System.alloc(layout) }) else {
            return false;
        };
        self.chunks.push(Chunk { ptr, layout });
        self.cursor = 0;
        self.reserved += chunk_size;
        true
    }

    fn can_reserve(&self, bytes: usize) -> bool {
        match self.config.capacity {
            Some(capacity) => self
                .reserved
                .checked_add(bytes)
                .is_some_and(|total| total <= capacity),
            None => true,
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        for (address, layout) in self.large.drain() {
            unsafe { System.dealloc(address as *mut u8, layout) };
        }
        for chunk in self.chunks.drain(..) {
            unsafe { System.dealloc(chunk.ptr.as_ptr(), chunk.layout) };
        }
    }
}

/// Backend serving allocations from a dedicated pool guarded by a single mutex.
///
/// Every operation takes the same lock, which makes this backend the main point of
/// contention under heavy concurrent use.
pub struct PooledBackend {
    pool: Mutex<Pool>,
}

impl PooledBackend {
    pub fn new(config: PoolConfig) -> Result<PooledBackend> {
        config.validate()?;
        Ok(PooledBackend {
            pool: Mutex::new(Pool::new(config)),
        })
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.lock().stats()
    }
}

unsafe impl AllocatorBackend for PooledBackend {
    fn name(&self) -> &'static str {
        "pooled"
    }

    fn allocate(&self, size: usize) -> *mut u8 {
        self.pool.lock().allocate(size)
    }

    unsafe fn free(&self, ptr: *mut u8, size: usize) {
        unsafe { self.pool.lock().free(ptr, size) }
    }

    unsafe fn reallocate(&self, ptr: *mut u8, old_size: usize, new_size: usize) -> *mut u8 {
        unsafe { self.pool.lock().reallocate(ptr, old_size, new_size) }
    }
}
