use std::sync::Barrier;

use strata_alloc::{Allocator, AllocatorConfig};
use strata_common::error::ErrorKind;

#[test]
fn test_default_allocator_is_a_singleton() {
    const THREADS: usize = 16;
    let barrier = Barrier::new(THREADS);
    let addresses: Vec<usize> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    Allocator::default_allocator() as *const Allocator as usize
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(addresses.iter().all(|&address| address == addresses[0]));
    assert!(std::ptr::eq(
        Allocator::default_allocator(),
        addresses[0] as *const Allocator
    ));
}

#[test]
fn test_default_allocator_round_trip() {
    let allocator = Allocator::default_allocator();
    let mut data = allocator.allocate(1024).unwrap();
    data.fill(0x42);
    assert!(unsafe { data.as_slice() }.iter().all(|&b| b == 0x42));
    let (ptr, size) = data.into_raw();
    unsafe { allocator.free_data(ptr, size) };
}

#[test]
fn test_configure_after_first_use_fails() {
    Allocator::default_allocator();
    let err = Allocator::configure_default(AllocatorConfig::default()).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidOperation { .. }));
}
