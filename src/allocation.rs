//! [`ByteAllocation`]: an owning handle pairing a raw byte block with a
//! typed live window inside it.
//!
//! The handle separates "which bytes do we own?" from "which objects are
//! currently alive in them?". That split is what lets the containers reuse
//! storage without reallocating, transfer allocations between container
//! types without copying, and keep front capacity across relocations.
//!
//! Invariants (checked by `debug_check` in debug builds):
//! * `alloc_start <= obj_start <= obj_end <= alloc_end` (as byte addresses),
//! * `obj_start`/`obj_end` are aligned to `align_of::<T>()` even when the
//!   live range is empty,
//! * the all-zero state is a valid empty handle using the default resource.

use core::mem;
use core::ptr;

use crate::lifetime;
use crate::resource::{MemoryResource, DEFAULT_MEMORY_RESOURCE};

/// Owning byte block plus typed live window. Fields are public on purpose:
/// power users (and the string's heap view) manipulate the window directly.
///
/// Copying is forbidden; moving transfers ownership and `mem::take` leaves
/// the all-zero empty state behind. Assignment is inherently safe against
/// the "source nested inside the destination" pattern because Rust moves
/// the source before dropping the old destination value.
#[repr(C)]
pub struct ByteAllocation<T> {
    /// First live object. Always `align_of::<T>()`-aligned.
    pub obj_start: *mut T,
    /// One past the last live object (exclusive). Always aligned.
    pub obj_end: *mut T,
    /// Base of the owned byte block, as returned by the resource.
    pub alloc_start: *mut u8,
    /// End of the owned byte block (exclusive).
    pub alloc_end: *mut u8,
    /// Alignment the block was requested with; needed for deallocation.
    pub alignment: usize,
    /// Owning resource, or null for the process default.
    pub custom_resource: *const MemoryResource,
}

// SAFETY: the handle owns its elements like `Vec<T>`; the resource pointer
// targets a `Sync` vtable struct.
unsafe impl<T: Send> Send for ByteAllocation<T> {}
// SAFETY: shared access only exposes `&T`.
unsafe impl<T: Sync> Sync for ByteAllocation<T> {}

impl<T> Default for ByteAllocation<T> {
    fn default() -> Self {
        Self {
            obj_start: ptr::null_mut(),
            obj_end: ptr::null_mut(),
            alloc_start: ptr::null_mut(),
            alloc_end: ptr::null_mut(),
            alignment: 0,
            custom_resource: ptr::null(),
        }
    }
}

impl<T> ByteAllocation<T> {
    const NOT_ZST: () = assert!(
        mem::size_of::<T>() != 0,
        "zero-sized element types are not supported by ByteAllocation"
    );

    // queries

    /// Effective resource: the custom one if set, the process default
    /// otherwise.
    #[inline]
    #[must_use]
    pub fn resource(&self) -> &MemoryResource {
        if self.custom_resource.is_null() {
            DEFAULT_MEMORY_RESOURCE
        } else {
            // SAFETY: a non-null resource pointer was installed by a factory
            // that required `&'static MemoryResource`.
            unsafe { &*self.custom_resource }
        }
    }

    /// True iff this handle owns a non-empty byte block. The live window may
    /// still be empty.
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.alloc_start.is_null()
    }

    /// Number of live elements.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        (self.obj_end as usize - self.obj_start as usize) / mem::size_of::<T>()
    }

    /// True iff there are no live elements.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.obj_start == self.obj_end
    }

    /// Size of the owned byte block.
    #[inline]
    #[must_use]
    pub fn alloc_size_bytes(&self) -> usize {
        self.alloc_end as usize - self.alloc_start as usize
    }

    /// The live window as a slice.
    #[inline]
    #[must_use]
    pub fn live(&self) -> &[T] {
        if self.obj_start.is_null() {
            return &[];
        }
        // SAFETY: [obj_start, obj_end) is the initialized live range.
        unsafe { core::slice::from_raw_parts(self.obj_start, self.len()) }
    }

    /// The live window as a mutable slice.
    #[inline]
    #[must_use]
    pub fn live_mut(&mut self) -> &mut [T] {
        if self.obj_start.is_null() {
            return &mut [];
        }
        // SAFETY: [obj_start, obj_end) is the initialized live range and we
        // have exclusive access.
        unsafe { core::slice::from_raw_parts_mut(self.obj_start, self.len()) }
    }

    // factories

    /// Allocates `[min_bytes, max_bytes]` bytes at `align` without
    /// constructing anything; the live window is empty at the block base.
    ///
    /// `min_bytes == 0` produces the invalid/empty handle (carrying the
    /// resource) without calling the resource.
    #[must_use]
    pub fn empty_bytes(
        min_bytes: usize,
        max_bytes: usize,
        align: usize,
        resource: Option<&'static MemoryResource>,
    ) -> Self {
        let resource = resource.map_or(ptr::null(), |r| r as *const MemoryResource);
        Self::empty_bytes_raw(min_bytes, max_bytes, align, resource, 0)
    }

    /// Like [`Self::empty_bytes`] but places the (empty) live window
    /// `obj_offset` elements past the block base. Used to reserve front
    /// capacity when relocating front-growing containers.
    #[must_use]
    pub fn empty_bytes_at_offset(
        min_bytes: usize,
        max_bytes: usize,
        align: usize,
        resource: Option<&'static MemoryResource>,
        obj_offset: usize,
    ) -> Self {
        let resource = resource.map_or(ptr::null(), |r| r as *const MemoryResource);
        Self::empty_bytes_raw(min_bytes, max_bytes, align, resource, obj_offset)
    }

    /// Shared factory body; the raw resource pointer variant keeps the
    /// sticky resource of an existing handle flowing into its replacement.
    pub(crate) fn empty_bytes_raw(
        min_bytes: usize,
        max_bytes: usize,
        align: usize,
        resource: *const MemoryResource,
        obj_offset: usize,
    ) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::NOT_ZST;
        contract!(
            align >= mem::align_of::<T>(),
            "allocation alignment must be at least align_of::<T>()"
        );
        contract!(min_bytes <= max_bytes, "must have min_bytes <= max_bytes");
        contract!(
            obj_offset * mem::size_of::<T>() <= min_bytes,
            "live-window offset exceeds the allocation"
        );

        let mut result = Self {
            obj_start: ptr::null_mut(),
            obj_end: ptr::null_mut(),
            alloc_start: ptr::null_mut(),
            alloc_end: ptr::null_mut(),
            alignment: align,
            custom_resource: resource,
        };

        // SAFETY: alignment checked above; min_bytes == 0 yields a null block
        // per the resource contract.
        let block = unsafe { result.resource().allocate(min_bytes, max_bytes, align) };
        result.alloc_start = block.ptr;
        result.alloc_end = if block.ptr.is_null() {
            ptr::null_mut()
        } else {
            // SAFETY: one-past-the-end of the owned block.
            unsafe { block.ptr.add(block.len) }
        };

        result.obj_start = if block.ptr.is_null() {
            ptr::null_mut()
        } else {
            // SAFETY: obj_offset elements fit in min_bytes (checked above).
            unsafe { block.ptr.cast::<T>().add(obj_offset) }
        };
        result.obj_end = result.obj_start;
        result
    }

    /// Allocates space for `count` elements at `align` with an empty live
    /// window.
    #[must_use]
    pub fn empty(count: usize, align: usize, resource: Option<&'static MemoryResource>) -> Self {
        let min_bytes = count * mem::size_of::<T>();
        Self::empty_bytes(min_bytes, min_bytes, align, resource)
    }

    /// Allocates and default-constructs `count` elements; the result is
    /// tight (live window == whole block).
    #[must_use]
    pub fn defaulted(count: usize, resource: Option<&'static MemoryResource>) -> Self
    where
        T: Default,
    {
        let mut result = Self::empty(count, mem::align_of::<T>(), resource);
        // SAFETY: the block has room for `count` uninitialized elements and
        // `obj_end` is the live-end cursor of this handle.
        unsafe { lifetime::default_create_to(&mut result.obj_end, count) };
        result
    }

    /// Allocates `count` elements, all clones of `value`; tight.
    #[must_use]
    pub fn filled(count: usize, value: &T, resource: Option<&'static MemoryResource>) -> Self
    where
        T: Clone,
    {
        let mut result = Self::empty(count, mem::align_of::<T>(), resource);
        // SAFETY: as in `defaulted`.
        unsafe { lifetime::fill_create_to(&mut result.obj_end, count, value) };
        result
    }

    /// Allocates a tight deep copy of `source`.
    #[must_use]
    pub fn copy_of(source: &[T], resource: Option<&'static MemoryResource>) -> Self
    where
        T: Clone,
    {
        let mut result = Self::empty(source.len(), mem::align_of::<T>(), resource);
        // SAFETY: as in `defaulted`; `source` cannot alias the fresh block.
        unsafe { lifetime::clone_create_to(&mut result.obj_end, source) };
        result
    }

    /// Allocates `count` elements and declares them live WITHOUT running
    /// any constructor. `T: Copy` stands in for "trivially copyable and
    /// trivially destructible".
    ///
    /// # Safety
    /// The caller must initialize every element before it is read.
    #[must_use]
    pub unsafe fn uninitialized(count: usize, resource: Option<&'static MemoryResource>) -> Self
    where
        T: Copy,
    {
        Self::uninitialized_unchecked(count, resource)
    }

    /// [`Self::uninitialized`] without the `T: Copy` guard. The safety
    /// burden is entirely on the caller.
    ///
    /// # Safety
    /// Every element must be initialized before it is read or dropped, and
    /// `T`'s drop glue must be safe to run on whatever the caller wrote.
    #[must_use]
    pub unsafe fn uninitialized_unchecked(
        count: usize,
        resource: Option<&'static MemoryResource>,
    ) -> Self {
        let mut result = Self::empty(count, mem::align_of::<T>(), resource);
        result.obj_end = if result.obj_start.is_null() {
            result.obj_start
        } else {
            result.obj_start.add(count)
        };
        result
    }

    // mutation

    /// Attempts to resize the owned block in place to `[min_bytes,
    /// max_bytes]`. On success `alloc_end` is updated; on failure nothing
    /// changes. Never moves the block.
    ///
    /// Cannot shrink below the bytes occupied by the live window.
    pub fn try_resize_in_place(&mut self, min_bytes: usize, max_bytes: usize) -> bool {
        contract!(min_bytes <= max_bytes, "invalid resize range");
        let live_end_bytes = self.obj_end as usize - self.alloc_start as usize;
        contract!(
            min_bytes >= live_end_bytes,
            "cannot resize below the live object range"
        );

        if self.alloc_start.is_null() {
            return false;
        }

        let old_bytes = self.alloc_size_bytes();
        // SAFETY: the block described by (alloc_start, old_bytes, alignment)
        // is live and owned by this handle.
        let resized = unsafe {
            self.resource().try_resize_in_place(
                self.alloc_start,
                old_bytes,
                min_bytes,
                max_bytes,
                self.alignment,
            )
        };
        match resized {
            Some(new_bytes) => {
                // SAFETY: the resource reports the new canonical block size.
                self.alloc_end = unsafe { self.alloc_start.add(new_bytes) };
                true
            }
            None => false,
        }
    }

    /// Moves the handle out, leaving an empty state that keeps the sticky
    /// resource for future allocations.
    #[must_use]
    pub fn take(&mut self) -> Self {
        let resource = self.custom_resource;
        let out = mem::take(self);
        self.custom_resource = resource;
        out
    }
}

impl<T> Drop for ByteAllocation<T> {
    fn drop(&mut self) {
        // SAFETY: the live window is exactly the initialized range.
        unsafe { lifetime::destroy_in_reverse(self.obj_start, self.obj_end) };

        if !self.alloc_start.is_null() {
            // SAFETY: (alloc_start, size, alignment) describe the block as
            // allocated from this resource.
            unsafe {
                self.resource()
                    .deallocate(self.alloc_start, self.alloc_size_bytes(), self.alignment);
            }
        }
    }
}
