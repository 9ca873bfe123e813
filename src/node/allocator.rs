//! The per-thread node allocator and the system node resource.
//!
//! Each thread lazily owns one [`NodeAllocator`] per resource. For every
//! small class the allocator keeps the head of a cyclic singly-linked ring
//! of slabs. The ring is touched ONLY by the owning thread: walking,
//! rewiring and head insertion are plain (non-atomic) operations. Only the
//! free bitmaps are shared, via the wait-free remote free.

use core::cell::Cell;
use core::ptr;
use core::sync::atomic::Ordering;

use crate::node::{
    freemap_of, next_slab_of, set_next_slab, slot_ptr, ClassIndex, NodeResource,
    LARGE_NODE_HEADER_BYTES, SMALL_CLASS_COUNT,
};
use crate::resource::DEFAULT_MEMORY_RESOURCE;
use crate::util::align_up;

/// Per-class slab ring heads of one thread. Null until the first
/// allocation of the class.
pub struct SlabRing {
    heads: [Cell<*mut u8>; SMALL_CLASS_COUNT],
}

impl SlabRing {
    #[must_use]
    fn new() -> Self {
        Self {
            heads: core::array::from_fn(|_| Cell::new(ptr::null_mut())),
        }
    }

    /// Current head slab for `idx`; null before first use.
    #[inline]
    #[must_use]
    pub fn head(&self, idx: ClassIndex) -> *mut u8 {
        self.heads[idx.get() as usize].get()
    }

    /// Rehomes the head of the ring for `idx`.
    #[inline]
    pub fn set_head(&self, idx: ClassIndex, base: *mut u8) {
        self.heads[idx.get() as usize].set(base);
    }
}

/// One thread's view of a [`NodeResource`].
///
/// Allocation goes through this type and is NOT thread-safe by design: a
/// `NodeAllocator` must only be used by the thread it was created on (the
/// system resource hands out a thread-local instance). Freeing a node needs
/// no allocator at all — see [`crate::node::free_node`].
pub struct NodeAllocator {
    resource: *const NodeResource,
    ring: SlabRing,
}

impl NodeAllocator {
    /// A fresh allocator view with all ring heads null.
    #[must_use]
    pub fn new(resource: &'static NodeResource) -> Self {
        Self {
            resource: resource as *const NodeResource,
            ring: SlabRing::new(),
        }
    }

    /// The per-class ring heads (read-only observation; mainly for tests
    /// and diagnostics).
    #[must_use]
    pub fn ring(&self) -> &SlabRing {
        &self.ring
    }

    /// Allocates one slot of the given small class.
    ///
    /// Hot path: a load plus one `fetch_and` on the head slab's bitmap.
    /// The owning thread is the only one clearing bits, so the chosen bit
    /// cannot be taken concurrently; remote frees may only ADD free bits
    /// between the load and the swap.
    pub fn allocate_node_bytes(&self, idx: ClassIndex) -> *mut u8 {
        contract!(idx.is_small(), "class must be small for slab allocation");

        let head = self.ring.head(idx);
        if head.is_null() {
            return self.refill(idx);
        }

        // SAFETY: a non-null head is a live slab owned by this ring.
        let freemap = unsafe { freemap_of(head) };
        let fm = freemap.load(Ordering::Acquire);
        if fm != 0 {
            let slot = fm.trailing_zeros();
            let bit = 1u64 << slot;
            let old = freemap.fetch_and(!bit, Ordering::AcqRel);
            contract!(
                old & bit != 0,
                "double allocation: multiple threads allocating from one slab ring"
            );
            // SAFETY: slot < 64 came out of the bitmap of this slab.
            return unsafe { slot_ptr(head, idx, slot) };
        }

        self.allocate_node_bytes_cold(idx)
    }

    /// Cold path: the head slab is full. Walk the ring once looking for a
    /// slab with free bits (typically published by remote frees); refill
    /// from the resource if the whole ring is exhausted.
    ///
    /// O(ring length) per cold miss. TODO: a per-class has-free hint would
    /// bound this for alloc-only workloads.
    #[cold]
    fn allocate_node_bytes_cold(&self, idx: ClassIndex) -> *mut u8 {
        let start = self.ring.head(idx);
        // SAFETY: ring links of live slabs are initialized and only this
        // thread rewires them.
        let mut base = unsafe { next_slab_of(start) };
        while base != start {
            contract!(!base.is_null(), "slab ring must be a cycle");

            // SAFETY: every ring entry is a live slab.
            let freemap = unsafe { freemap_of(base) };
            let fm = freemap.load(Ordering::Acquire);
            if fm != 0 {
                self.ring.set_head(idx, base);
                let slot = fm.trailing_zeros();
                let bit = 1u64 << slot;
                let old = freemap.fetch_and(!bit, Ordering::AcqRel);
                contract!(
                    old & bit != 0,
                    "double allocation: multiple threads allocating from one slab ring"
                );
                // SAFETY: slot < 64 came out of the bitmap of this slab.
                return unsafe { slot_ptr(base, idx, slot) };
            }

            // SAFETY: as above.
            base = unsafe { next_slab_of(base) };
        }

        self.refill(idx)
    }

    fn refill(&self, idx: ClassIndex) -> *mut u8 {
        // SAFETY: the resource was installed from a 'static reference and
        // the ring belongs to this allocator.
        unsafe {
            let resource = &*self.resource;
            (resource.refill_slabs_and_allocate_node_bytes)(&self.ring, idx, resource.userdata)
        }
    }

    /// Allocates a large node (class size above the small boundary) through
    /// the resource. Returns the user pointer; the header below it is
    /// already populated.
    pub fn allocate_node_bytes_large(&self, idx: ClassIndex, size: usize, align: usize) -> *mut u8 {
        contract!(!idx.is_small(), "small classes are served from slabs");
        // SAFETY: resource installed from a 'static reference.
        unsafe {
            let resource = &*self.resource;
            (resource.allocate_node_bytes_large)(idx, size, align, resource.userdata)
        }
    }
}

// system node resource

std::thread_local! {
    /// The calling thread's allocator for the system node resource,
    /// created lazily on first use. Slabs allocated by it live for the
    /// process lifetime; nodes may legitimately outlive the thread.
    static SYSTEM_THREAD_ALLOCATOR: NodeAllocator = NodeAllocator::new(DEFAULT_NODE_RESOURCE);
}

unsafe fn system_get_allocator(_userdata: *mut ()) -> *const NodeAllocator {
    // SAFETY OF THE RETURNED POINTER: the thread-local lives until thread
    // exit and the vtable contract only promises validity for the calling
    // thread's lifetime.
    SYSTEM_THREAD_ALLOCATOR.with(|allocator| allocator as *const NodeAllocator)
}

/// Allocates a fresh slab from the byte resource, initializes header and
/// freemap, wires it in as the new ring head and serves the first slot.
unsafe fn system_refill_slabs_and_allocate_node_bytes(
    ring: &SlabRing,
    idx: ClassIndex,
    _userdata: *mut (),
) -> *mut u8 {
    let slab_size = idx.slab_size();

    // slabs are aligned to their own size: base recovery is a mask
    let block = DEFAULT_MEMORY_RESOURCE.allocate(slab_size, slab_size, slab_size);
    contract!(!block.ptr.is_null(), "slab allocation must not fail silently");
    contract!(
        block.ptr as usize % slab_size == 0,
        "slab must be aligned to its own size"
    );
    let base = block.ptr;

    // plain writes: the slab is not published to any other thread yet
    base.cast::<u64>().write(idx.initial_freemap());
    let head = ring.head(idx);
    set_next_slab(base, if head.is_null() { base } else { head });
    ring.set_head(idx, base);

    log::trace!(
        "node slab refill: class {} ({} B slots), slab at {base:p}",
        idx.get(),
        idx.class_size()
    );

    // serve the first free slot of the fresh slab
    let freemap = freemap_of(base);
    let fm = freemap.load(Ordering::Acquire);
    contract!(fm != 0, "a fresh slab must have free slots");
    let slot = fm.trailing_zeros();
    let bit = 1u64 << slot;
    let old = freemap.fetch_and(!bit, Ordering::AcqRel);
    contract!(old & bit != 0, "fresh slab bitmap corrupted");
    slot_ptr(base, idx, slot)
}

/// Serves a large node: `[u64 size][u64 align][*const NodeResource]`
/// directly below the user pointer, with the block over-allocated by
/// `align_up(24, align)` so alignments above 8 keep the header adjacent.
unsafe fn system_allocate_node_bytes_large(
    _idx: ClassIndex,
    size: usize,
    align: usize,
    _userdata: *mut (),
) -> *mut u8 {
    let align = align.max(8);
    let header_offset = align_up(LARGE_NODE_HEADER_BYTES, align);
    let total = header_offset + size;

    let block = DEFAULT_MEMORY_RESOURCE.allocate(total, total, align);
    contract!(!block.ptr.is_null(), "large node allocation must not fail silently");

    let user = block.ptr.add(header_offset);
    user.sub(24).cast::<u64>().write(size as u64);
    user.sub(16).cast::<u64>().write(align as u64);
    user.sub(8)
        .cast::<*const NodeResource>()
        .write(DEFAULT_NODE_RESOURCE as *const NodeResource);

    log::trace!("large node allocated: {size} B at {user:p}");
    user
}

unsafe fn system_deallocate_node_bytes_large(ptr: *mut u8, _idx: ClassIndex, _userdata: *mut ()) {
    let size = ptr.sub(24).cast::<u64>().read() as usize;
    let align = ptr.sub(16).cast::<u64>().read() as usize;
    let header_offset = align_up(LARGE_NODE_HEADER_BYTES, align);
    let total = header_offset + size;
    DEFAULT_MEMORY_RESOURCE.deallocate(ptr.sub(header_offset), total, align);
}

static SYSTEM_NODE_RESOURCE: NodeResource = NodeResource {
    get_allocator: system_get_allocator,
    allocate_node_bytes_large: system_allocate_node_bytes_large,
    refill_slabs_and_allocate_node_bytes: system_refill_slabs_and_allocate_node_bytes,
    deallocate_node_bytes_large: system_deallocate_node_bytes_large,
    userdata: ptr::null_mut(),
};

/// Process-wide default node resource, valid during static initialization.
/// Hands out per-thread allocators lazily.
pub static DEFAULT_NODE_RESOURCE: &NodeResource = &SYSTEM_NODE_RESOURCE;

/// Runs `f` with the calling thread's allocator for the default node
/// resource.
pub fn with_default_node_allocator<R>(f: impl FnOnce(&NodeAllocator) -> R) -> R {
    // SAFETY: the system resource returns a pointer to the calling thread's
    // live thread-local allocator.
    unsafe {
        let allocator = (DEFAULT_NODE_RESOURCE.get_allocator)(DEFAULT_NODE_RESOURCE.userdata);
        f(&*allocator)
    }
}
