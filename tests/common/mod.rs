//! Shared test instrumentation: a counting memory resource that delegates
//! to the system resource while recording traffic.

#![allow(dead_code)] // each integration test binary uses a subset

use std::sync::atomic::{AtomicUsize, Ordering};

use keel::{MemoryResource, RawBytes, DEFAULT_MEMORY_RESOURCE};

/// Allocation traffic recorded by a counting resource.
pub struct Counters {
    allocations: AtomicUsize,
    deallocations: AtomicUsize,
    bytes_requested: AtomicUsize,
}

impl Counters {
    pub const fn new() -> Self {
        Self {
            allocations: AtomicUsize::new(0),
            deallocations: AtomicUsize::new(0),
            bytes_requested: AtomicUsize::new(0),
        }
    }

    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::Relaxed)
    }

    pub fn deallocations(&self) -> usize {
        self.deallocations.load(Ordering::Relaxed)
    }

    pub fn bytes_requested(&self) -> usize {
        self.bytes_requested.load(Ordering::Relaxed)
    }

    pub fn live_allocations(&self) -> isize {
        self.allocations() as isize - self.deallocations() as isize
    }
}

unsafe fn counting_allocate(
    min_bytes: usize,
    max_bytes: usize,
    align: usize,
    userdata: *mut (),
) -> RawBytes {
    let counters = &*(userdata as *const Counters);
    if min_bytes > 0 {
        counters.allocations.fetch_add(1, Ordering::Relaxed);
        counters.bytes_requested.fetch_add(min_bytes, Ordering::Relaxed);
    }
    DEFAULT_MEMORY_RESOURCE.allocate(min_bytes, max_bytes, align)
}

unsafe fn counting_try_allocate(
    min_bytes: usize,
    max_bytes: usize,
    align: usize,
    userdata: *mut (),
) -> Option<RawBytes> {
    let counters = &*(userdata as *const Counters);
    let block = DEFAULT_MEMORY_RESOURCE.try_allocate(min_bytes, max_bytes, align)?;
    if min_bytes > 0 {
        counters.allocations.fetch_add(1, Ordering::Relaxed);
        counters.bytes_requested.fetch_add(min_bytes, Ordering::Relaxed);
    }
    Some(block)
}

unsafe fn counting_deallocate(ptr: *mut u8, bytes: usize, align: usize, userdata: *mut ()) {
    let counters = &*(userdata as *const Counters);
    if !ptr.is_null() {
        counters.deallocations.fetch_add(1, Ordering::Relaxed);
    }
    DEFAULT_MEMORY_RESOURCE.deallocate(ptr, bytes, align);
}

unsafe fn counting_try_resize(
    ptr: *mut u8,
    old_bytes: usize,
    min_bytes: usize,
    max_bytes: usize,
    align: usize,
    _userdata: *mut (),
) -> Option<usize> {
    DEFAULT_MEMORY_RESOURCE.try_resize_in_place(ptr, old_bytes, min_bytes, max_bytes, align)
}

/// Builds a resource that counts into `counters` and forwards to the
/// system resource. Suitable for `static` initializers.
pub const fn counting_resource(counters: &'static Counters) -> MemoryResource {
    MemoryResource {
        allocate_bytes: counting_allocate,
        try_allocate_bytes: counting_try_allocate,
        deallocate_bytes: counting_deallocate,
        try_resize_bytes_in_place: counting_try_resize,
        userdata: counters as *const Counters as *mut (),
    }
}
