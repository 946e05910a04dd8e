//! Debug bookkeeping layered over a backend: an outstanding-byte counter and, in
//! extended mode, a registry of every live pointer with the stack trace that
//! produced it.
//!
//! Consistency violations (freeing with the wrong size, freeing an untracked pointer,
//! releasing more bytes than are outstanding, leaking at teardown) are programming
//! errors in the caller and panic.

use std::{
    backtrace::Backtrace,
    fmt,
    ptr::NonNull,
    sync::atomic::{AtomicU64, Ordering},
};

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::config::DebugMode;

/// A live allocation reported by [`Allocator::leak_report`](crate::Allocator::leak_report).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakedAllocation {
    pub address: usize,
    pub size: usize,
    /// Name of the thread that made the allocation, if it had one.
    pub thread: Option<String>,
    pub backtrace: String,
}

impl fmt::Display for LeakedAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "allocation of size {} at address {:#x} (thread: {})",
            self.size,
            self.address,
            self.thread.as_deref().unwrap_or("<unnamed>")
        )?;
        write!(f, "stack trace:\n{}", self.backtrace)
    }
}

pub(crate) struct AllocationRecord {
    size: usize,
    thread: Option<String>,
    /// Captured unresolved; symbols are only resolved when a report is built.
    backtrace: Backtrace,
}

impl AllocationRecord {
    fn capture(size: usize) -> AllocationRecord {
        AllocationRecord {
            size,
            thread: std::thread::current().name().map(str::to_owned),
            backtrace: Backtrace::force_capture(),
        }
    }
}

pub(crate) struct AllocatorDebugInfo {
    mode: DebugMode,
    /// Bytes allocated but not yet freed.
    outstanding: AtomicU64,
    pointers: Option<Mutex<AHashMap<usize, AllocationRecord>>>,
}

impl AllocatorDebugInfo {
    /// Returns `None` for [`DebugMode::Disabled`].
    pub(crate) fn new(mode: DebugMode) -> Option<AllocatorDebugInfo> {
        let pointers = match mode {
            DebugMode::Disabled => return None,
            DebugMode::Counting => None,
            DebugMode::Extended => Some(Mutex::new(AHashMap::new())),
        };
        Some(AllocatorDebugInfo {
            mode,
            outstanding: AtomicU64::new(0),
            pointers,
        })
    }

    pub(crate) fn mode(&self) -> DebugMode {
        self.mode
    }

    pub(crate) fn outstanding_bytes(&self) -> u64 {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Records a region the backend has just produced.
    pub(crate) fn allocate_data(&self, ptr: NonNull<u8>, size: usize) {
        self.outstanding.fetch_add(size as u64, Ordering::AcqRel);
        if let Some(pointers) = &self.pointers {
            let record = AllocationRecord::capture(size);
            let address = ptr.as_ptr() as usize;
            if let Some(previous) = pointers.lock().insert(address, record) {
                panic!(
                    "backend returned address {address:#x} which is still tracked \
                     as a live allocation of size {}",
                    previous.size
                );
            }
        }
    }

    /// Forgets a region the backend is about to consume.
    ///
    /// Returns the registry entry (extended mode only) so that a failed reallocation
    /// can put it back.
    pub(crate) fn free_data(&self, ptr: NonNull<u8>, size: usize) -> Option<AllocationRecord> {
        assert!(size > 0, "freeing address {:#x} with size 0", ptr.as_ptr() as usize);
        let removed = match &self.pointers {
            Some(pointers) => {
                let address = ptr.as_ptr() as usize;
                let mut pointers = pointers.lock();
                match pointers.remove(&address) {
                    Some(record) if record.size == size => Some(record),
                    Some(record) => {
                        let tracked = record.size;
                        pointers.insert(address, record);
                        panic!(
                            "freeing address {address:#x} with size {size}, \
                             but it was allocated with size {tracked}"
                        );
                    }
                    None => panic!("freeing untracked address {address:#x} (size {size})"),
                }
            }
            None => None,
        };
        if let Err(current) =
            self.outstanding
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                    current.checked_sub(size as u64)
                })
        {
            panic!("freeing {size} bytes but only {current} bytes are outstanding");
        }
        removed
    }

    /// Undoes a [`free_data`](Self::free_data) whose backend call did not happen.
    pub(crate) fn restore(&self, ptr: NonNull<u8>, size: usize, record: Option<AllocationRecord>) {
        self.outstanding.fetch_add(size as u64, Ordering::AcqRel);
        if let (Some(pointers), Some(record)) = (&self.pointers, record) {
            pointers.lock().insert(ptr.as_ptr() as usize, record);
        }
    }

    /// Lists every tracked allocation, ordered by address. Empty unless extended.
    pub(crate) fn leaks(&self) -> Vec<LeakedAllocation> {
        let Some(pointers) = &self.pointers else {
            return Vec::new();
        };
        let mut leaks: Vec<LeakedAllocation> = pointers
            .lock()
            .iter()
            .map(|(&address, record)| LeakedAllocation {
                address,
                size: record.size,
                thread: record.thread.clone(),
                backtrace: record.backtrace.to_string(),
            })
            .collect();
        leaks.sort_by_key(|leak| leak.address);
        leaks
    }

    /// Builds the teardown report for `outstanding` bytes: the total, then one entry
    /// per tracked allocation in extended mode.
    fn leak_message(&self, outstanding: u64) -> String {
        let mut message = format!("allocator has {outstanding} outstanding bytes");
        if self.pointers.is_none() {
            message.push_str(" (use DebugMode::Extended for a per-allocation report)");
            return message;
        }
        for leak in self.leaks() {
            message.push('\n');
            message.push_str(&leak.to_string());
        }
        message
    }

    /// Panics with the leak report if any bytes are outstanding.
    pub(crate) fn check_leaks(&self) {
        let outstanding = self.outstanding_bytes();
        if outstanding != 0 {
            let message = self.leak_message(outstanding);
            log::error!("{message}");
            panic!("{message}");
        }
    }
}

impl Drop for AllocatorDebugInfo {
    fn drop(&mut self) {
        let outstanding = *self.outstanding.get_mut();
        if outstanding == 0 {
            return;
        }
        let message = self.leak_message(outstanding);
        log::error!("allocator dropped: {message}");
        if std::thread::panicking() {
            return;
        }
        panic!("allocator dropped: {message}");
    }
}
