//! Polymorphic byte resources: the allocation seam of the whole crate.
//!
//! A [`MemoryResource`] is a plain struct of four function pointers plus an
//! opaque `userdata` pointer — the same shape as `core::task::RawWakerVTable`.
//! This keeps resources free of vtable objects and non-trivial constructors,
//! so the process-wide default can live in the data segment and is valid
//! already during static initialization.
//!
//! The design deliberately separates *in-place resize* from `realloc`:
//! resources never move an allocation. Moving would invalidate pointers into
//! the block, which is unsafe for containers where element addresses must
//! stay stable during growth (e.g. appending a copy of an element of the
//! same container).

use core::ptr;

use std::alloc::{self, Layout};

/// A block of raw bytes handed out by a [`MemoryResource`].
#[derive(Clone, Copy, Debug)]
pub struct RawBytes {
    /// Start of the block; null iff `len == 0`.
    pub ptr: *mut u8,
    /// Actual size of the block in bytes.
    pub len: usize,
}

impl RawBytes {
    /// The canonical zero-byte block.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            ptr: ptr::null_mut(),
            len: 0,
        }
    }
}

/// Allocate between `min_bytes` and `max_bytes` with at least `align`.
///
/// `min_bytes == 0` returns the empty block without touching the backend.
/// `min_bytes > 0` returns a non-null block with `len` in
/// `[min_bytes, max_bytes]`; failure is fatal. Resources that round to size
/// classes report the rounded-up size so callers can use the slack.
pub type AllocateBytesFn =
    unsafe fn(min_bytes: usize, max_bytes: usize, align: usize, userdata: *mut ()) -> RawBytes;

/// Fallible variant of [`AllocateBytesFn`]: returns `None` instead of
/// terminating when the allocation cannot be served.
pub type TryAllocateBytesFn = unsafe fn(
    min_bytes: usize,
    max_bytes: usize,
    align: usize,
    userdata: *mut (),
) -> Option<RawBytes>;

/// Return a block previously obtained from the same resource.
///
/// `bytes` must be the value last reported by allocation or in-place resize,
/// and `align` the alignment passed at allocation time.
pub type DeallocateBytesFn = unsafe fn(ptr: *mut u8, bytes: usize, align: usize, userdata: *mut ());

/// Attempt to resize a block in place, without moving or freeing it.
///
/// On success the block stays at `ptr`, the first `min(old_bytes, new)`
/// bytes are preserved and the returned size (within `[min_bytes,
/// max_bytes]`) becomes the canonical size for later calls. On failure
/// (`None`) the block is untouched and still `old_bytes` large. Shrinking
/// (`max_bytes < old_bytes`) is allowed; the alignment is never raised.
pub type TryResizeBytesInPlaceFn = unsafe fn(
    ptr: *mut u8,
    old_bytes: usize,
    min_bytes: usize,
    max_bytes: usize,
    align: usize,
    userdata: *mut (),
) -> Option<usize>;

/// A pluggable allocator of raw bytes.
///
/// This is a plain value type: no identity, no lifecycle beyond "exists at a
/// stable address". Containers store `*const MemoryResource` where null means
/// [`DEFAULT_MEMORY_RESOURCE`]; because every resource used with the crate
/// must outlive everything allocated from it, the public container APIs only
/// accept `&'static MemoryResource`.
///
/// # Safety contract for implementors
///
/// * All four entry points must uphold the documented size/alignment rules
///   exactly; `align` is always a power of two.
/// * The entry points may be called from any thread concurrently; `userdata`
///   is the sole per-instance mutable state and must be synchronized by the
///   implementation.
pub struct MemoryResource {
    pub allocate_bytes: AllocateBytesFn,
    pub try_allocate_bytes: TryAllocateBytesFn,
    pub deallocate_bytes: DeallocateBytesFn,
    pub try_resize_bytes_in_place: TryResizeBytesInPlaceFn,
    /// User-defined state for custom resources; null for stateless ones.
    pub userdata: *mut (),
}

// SAFETY: the implementor contract above requires thread-safe entry points;
// `userdata` is only ever passed back to those entry points.
unsafe impl Send for MemoryResource {}
// SAFETY: see above.
unsafe impl Sync for MemoryResource {}

impl MemoryResource {
    /// Calls [`MemoryResource::allocate_bytes`] with this resource's userdata.
    ///
    /// # Safety
    /// `align` must be a power of two and `min_bytes <= max_bytes`.
    #[inline]
    pub unsafe fn allocate(&self, min_bytes: usize, max_bytes: usize, align: usize) -> RawBytes {
        (self.allocate_bytes)(min_bytes, max_bytes, align, self.userdata)
    }

    /// Calls [`MemoryResource::try_allocate_bytes`] with this resource's userdata.
    ///
    /// # Safety
    /// `align` must be a power of two and `min_bytes <= max_bytes`.
    #[inline]
    pub unsafe fn try_allocate(
        &self,
        min_bytes: usize,
        max_bytes: usize,
        align: usize,
    ) -> Option<RawBytes> {
        (self.try_allocate_bytes)(min_bytes, max_bytes, align, self.userdata)
    }

    /// Calls [`MemoryResource::deallocate_bytes`] with this resource's userdata.
    ///
    /// # Safety
    /// `ptr` must have been returned by this resource, `bytes` must be the
    /// canonical size of the block and `align` its original alignment.
    #[inline]
    pub unsafe fn deallocate(&self, ptr: *mut u8, bytes: usize, align: usize) {
        (self.deallocate_bytes)(ptr, bytes, align, self.userdata);
    }

    /// Calls [`MemoryResource::try_resize_bytes_in_place`] with this
    /// resource's userdata.
    ///
    /// # Safety
    /// `ptr`/`old_bytes`/`align` must describe a live block of this resource
    /// and `1 <= min_bytes <= max_bytes`.
    #[inline]
    pub unsafe fn try_resize_in_place(
        &self,
        ptr: *mut u8,
        old_bytes: usize,
        min_bytes: usize,
        max_bytes: usize,
        align: usize,
    ) -> Option<usize> {
        (self.try_resize_bytes_in_place)(ptr, old_bytes, min_bytes, max_bytes, align, self.userdata)
    }
}

/// Builds the layout for a request, folding the contract checks into one
/// place. Alignments below `align_of::<usize>()` are clamped so the system
/// allocator never sees a degenerate request.
fn request_layout(bytes: usize, align: usize) -> Layout {
    contract!(align.is_power_of_two(), "alignment must be a power of two");
    let align = align.max(core::mem::align_of::<usize>());
    match Layout::from_size_align(bytes, align) {
        Ok(layout) => layout,
        Err(_) => {
            contract!(false, "allocation request overflows the address space");
            unreachable!()
        }
    }
}

unsafe fn system_allocate_bytes(
    min_bytes: usize,
    max_bytes: usize,
    align: usize,
    userdata: *mut (),
) -> RawBytes {
    match system_try_allocate_bytes(min_bytes, max_bytes, align, userdata) {
        Some(block) => block,
        None => alloc::handle_alloc_error(request_layout(min_bytes, align)),
    }
}

unsafe fn system_try_allocate_bytes(
    min_bytes: usize,
    max_bytes: usize,
    align: usize,
    _userdata: *mut (),
) -> Option<RawBytes> {
    contract!(min_bytes <= max_bytes, "must have min_bytes <= max_bytes");
    if min_bytes == 0 {
        return Some(RawBytes::empty());
    }

    let layout = request_layout(min_bytes, align);
    // SAFETY: the layout has non-zero size (min_bytes > 0 was checked).
    let ptr = unsafe { alloc::alloc(layout) };
    if ptr.is_null() {
        return None;
    }
    // The system allocator gives no usable size back; report exactly the
    // minimum so deallocation sizes round-trip.
    Some(RawBytes {
        ptr,
        len: min_bytes,
    })
}

unsafe fn system_deallocate_bytes(ptr: *mut u8, bytes: usize, align: usize, _userdata: *mut ()) {
    if ptr.is_null() {
        return;
    }
    // SAFETY: the caller passes the pointer, canonical size and alignment of
    // a block obtained from `system_try_allocate_bytes`, so this layout is
    // the one it was allocated with.
    unsafe { alloc::dealloc(ptr, request_layout(bytes, align)) };
}

unsafe fn system_try_resize_bytes_in_place(
    ptr: *mut u8,
    old_bytes: usize,
    min_bytes: usize,
    max_bytes: usize,
    align: usize,
    _userdata: *mut (),
) -> Option<usize> {
    contract!(!ptr.is_null(), "cannot resize a null block");
    contract!(old_bytes > 0, "old_bytes must be positive");
    contract!(
        1 <= min_bytes && min_bytes <= max_bytes,
        "must have 1 <= min_bytes <= max_bytes"
    );
    contract!(align.is_power_of_two(), "alignment must be a power of two");

    // The global allocator offers no in-place probe. `realloc` may move the
    // block, which would silently invalidate interior pointers, so growth is
    // reported as "not possible" and containers relocate explicitly.
    None
}

/// The system resource, stored in the data segment so the pointer is valid
/// even while other statics are still initializing.
static SYSTEM_MEMORY_RESOURCE: MemoryResource = MemoryResource {
    allocate_bytes: system_allocate_bytes,
    try_allocate_bytes: system_try_allocate_bytes,
    deallocate_bytes: system_deallocate_bytes,
    try_resize_bytes_in_place: system_try_resize_bytes_in_place,
    userdata: ptr::null_mut(),
};

/// Process-wide default resource, used whenever a handle carries a null
/// resource pointer. Backed by the global allocator.
pub static DEFAULT_MEMORY_RESOURCE: &MemoryResource = &SYSTEM_MEMORY_RESOURCE;
