//! The shared foundation for contiguous owning containers.
//!
//! [`AllocatingContainer`] layers typed element lifetime, front/back growth,
//! capacity and reserve policy, panic-safe relocation and ordered/unordered
//! removal on top of a [`ByteAllocation`]. Concrete containers (such as
//! [`vector::Vector`] and the string's heap mode) wrap it and choose a
//! policy via the `USES_CAPACITY_FRONT` parameter: whether front capacity
//! must be preserved when the storage is relocated.
//!
//! # Panic and reference guarantees
//!
//! Applies to all growing operations (the `_stable` variants never
//! allocate):
//!
//! * Allocation failure (fatal path) terminates; the fallible resize probe
//!   failing leaves the container unchanged. Capacity may increase even if
//!   a later element constructor panics.
//! * If an element constructor panics, elements already appended in the
//!   same call remain (multi-element calls) or nothing changes
//!   (single-element calls); the live range is always structurally valid.
//! * Relocation moves elements bitwise; element addresses change but no
//!   user code runs, so relocation itself cannot fail.
//! * New elements are constructed BEFORE old elements are relocated, so a
//!   panicking constructor can only ever destroy the new elements.
//! * Any relocation invalidates raw pointers kept into the storage.

pub mod vector;

use core::mem;
use core::ops::{Index, IndexMut};
use core::ptr;

use crate::allocation::ByteAllocation;
use crate::lifetime;
use crate::resource::MemoryResource;
use crate::util::{align_up, DESTRUCTIVE_INTERFERENCE_SIZE};

/// Contiguous container core over a [`ByteAllocation`].
///
/// `USES_CAPACITY_FRONT` is the relocation policy: `true` preserves existing
/// front capacity when the storage moves (double-ended containers), `false`
/// drops it to avoid wasting memory (back-only containers).
#[repr(transparent)]
pub struct AllocatingContainer<T, const USES_CAPACITY_FRONT: bool> {
    /// The allocation backing this container; direct manipulation is for
    /// power users who uphold the live-window invariants themselves.
    pub data: ByteAllocation<T>,
}

impl<T, const F: bool> Default for AllocatingContainer<T, F> {
    fn default() -> Self {
        Self {
            data: ByteAllocation::default(),
        }
    }
}

impl<T, const USES_CAPACITY_FRONT: bool> AllocatingContainer<T, USES_CAPACITY_FRONT> {
    /// Minimum alignment of every heap allocation made by this container.
    ///
    /// Allocations are aligned (and size-rounded) to one destructive
    /// interference unit so that two distinct container allocations never
    /// share a cache line.
    pub const ALLOC_ALIGNMENT: usize = {
        let a = mem::align_of::<T>();
        if a > DESTRUCTIVE_INTERFERENCE_SIZE {
            a
        } else {
            DESTRUCTIVE_INTERFERENCE_SIZE
        }
    };

    /// Cap on the allocator leeway when growing: one OS page. Lets
    /// page-granular allocators hand back a whole page without letting
    /// small allocations balloon.
    pub const ALLOC_MAX_SLACK: usize = 4096;

    /// Next allocation size when growing: doubling for amortized O(1),
    /// rounded up to the cache-line multiple.
    #[inline]
    #[must_use]
    pub const fn alloc_grow_size_for(curr_bytes: usize, min_bytes: usize) -> usize {
        let doubled = curr_bytes << 1;
        let want = if doubled > min_bytes { doubled } else { min_bytes };
        align_up(want, Self::ALLOC_ALIGNMENT)
    }

    // construction

    /// An empty container bound to no allocation and the default resource.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopts an existing allocation; its live objects become the elements.
    #[must_use]
    pub fn from_allocation(data: ByteAllocation<T>) -> Self {
        Self { data }
    }

    /// An empty container that will allocate from `resource` (sticky).
    #[must_use]
    pub fn with_resource(resource: Option<&'static MemoryResource>) -> Self {
        let mut data = ByteAllocation::default();
        data.custom_resource = resource.map_or(ptr::null(), |r| r as *const MemoryResource);
        Self { data }
    }

    /// `count` default-constructed elements.
    #[must_use]
    pub fn defaulted(count: usize, resource: Option<&'static MemoryResource>) -> Self
    where
        T: Default,
    {
        let byte_size = align_up(count * mem::size_of::<T>(), Self::ALLOC_ALIGNMENT);
        let mut data =
            ByteAllocation::empty_bytes(byte_size, byte_size, Self::ALLOC_ALIGNMENT, resource);
        // SAFETY: the block holds at least `count` uninitialized elements.
        unsafe { lifetime::default_create_to(&mut data.obj_end, count) };
        Self { data }
    }

    /// `count` clones of `value`.
    #[must_use]
    pub fn filled(count: usize, value: &T, resource: Option<&'static MemoryResource>) -> Self
    where
        T: Clone,
    {
        let byte_size = align_up(count * mem::size_of::<T>(), Self::ALLOC_ALIGNMENT);
        let mut data =
            ByteAllocation::empty_bytes(byte_size, byte_size, Self::ALLOC_ALIGNMENT, resource);
        // SAFETY: as in `defaulted`.
        unsafe { lifetime::fill_create_to(&mut data.obj_end, count, value) };
        Self { data }
    }

    /// Deep copy of a slice.
    #[must_use]
    pub fn copy_of(source: &[T], resource: Option<&'static MemoryResource>) -> Self
    where
        T: Clone,
    {
        let byte_size = align_up(source.len() * mem::size_of::<T>(), Self::ALLOC_ALIGNMENT);
        let mut data =
            ByteAllocation::empty_bytes(byte_size, byte_size, Self::ALLOC_ALIGNMENT, resource);
        // SAFETY: as in `defaulted`; the fresh block cannot alias `source`.
        unsafe { lifetime::clone_create_to(&mut data.obj_end, source) };
        Self { data }
    }

    /// Empty container with room for at least `capacity` elements at the
    /// back. Actual capacity may be larger due to cache-line rounding.
    #[must_use]
    pub fn with_capacity(capacity: usize, resource: Option<&'static MemoryResource>) -> Self {
        let byte_size = align_up(capacity * mem::size_of::<T>(), Self::ALLOC_ALIGNMENT);
        Self {
            data: ByteAllocation::empty_bytes(byte_size, byte_size, Self::ALLOC_ALIGNMENT, resource),
        }
    }

    /// `count` elements declared live without running constructors.
    ///
    /// # Safety
    /// Every element must be written before it is read; `T: Copy` keeps
    /// drop glue out of the picture.
    #[must_use]
    pub unsafe fn uninitialized(count: usize, resource: Option<&'static MemoryResource>) -> Self
    where
        T: Copy,
    {
        let byte_size = align_up(count * mem::size_of::<T>(), Self::ALLOC_ALIGNMENT);
        let mut data: ByteAllocation<T> =
            ByteAllocation::empty_bytes(byte_size, byte_size, Self::ALLOC_ALIGNMENT, resource);
        if !data.obj_start.is_null() {
            data.obj_end = data.obj_start.add(count);
        }
        Self { data }
    }

    /// Releases the underlying allocation (live objects included), leaving
    /// the container empty but keeping its resource for future growth.
    #[must_use]
    pub fn extract_allocation(&mut self) -> ByteAllocation<T> {
        self.data.take()
    }

    // queries

    /// Number of live elements.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Total size of the live elements in bytes.
    #[inline]
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.len() * mem::size_of::<T>()
    }

    /// True iff `len() == 0`.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The elements as a slice.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        self.data.live()
    }

    /// The elements as a mutable slice.
    #[inline]
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        self.data.live_mut()
    }

    /// Pointer to the first element; may be null for an unallocated
    /// container.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *const T {
        self.data.obj_start
    }

    /// Mutable pointer to the first element; may be null.
    #[inline]
    #[must_use]
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.data.obj_start
    }

    /// Whole slots available before the first element.
    #[inline]
    #[must_use]
    pub fn capacity_front(&self) -> usize {
        (self.data.obj_start as usize - self.data.alloc_start as usize) / mem::size_of::<T>()
    }

    /// Whole slots available past the last element.
    #[inline]
    #[must_use]
    pub fn capacity_back(&self) -> usize {
        (self.data.alloc_end as usize - self.data.obj_end as usize) / mem::size_of::<T>()
    }

    /// Room to grow by `count` at the front without reallocating?
    #[inline]
    #[must_use]
    pub fn has_capacity_front_for(&self, count: usize) -> bool {
        self.data.obj_start as usize - self.data.alloc_start as usize
            >= count * mem::size_of::<T>()
    }

    /// Room to grow by `count` at the back without reallocating?
    #[inline]
    #[must_use]
    pub fn has_capacity_back_for(&self, count: usize) -> bool {
        self.data.alloc_end as usize - self.data.obj_end as usize >= count * mem::size_of::<T>()
    }

    /// First element. Precondition: not empty.
    #[inline]
    #[must_use]
    pub fn first(&self) -> &T {
        contract!(!self.is_empty(), "container is empty");
        // SAFETY: non-empty live range.
        unsafe { &*self.data.obj_start }
    }

    /// First element, mutable. Precondition: not empty.
    #[inline]
    #[must_use]
    pub fn first_mut(&mut self) -> &mut T {
        contract!(!self.is_empty(), "container is empty");
        // SAFETY: non-empty live range, exclusive access.
        unsafe { &mut *self.data.obj_start }
    }

    /// Last element. Precondition: not empty.
    #[inline]
    #[must_use]
    pub fn last(&self) -> &T {
        contract!(!self.is_empty(), "container is empty");
        // SAFETY: non-empty live range.
        unsafe { &*self.data.obj_end.sub(1) }
    }

    /// Last element, mutable. Precondition: not empty.
    #[inline]
    #[must_use]
    pub fn last_mut(&mut self) -> &mut T {
        contract!(!self.is_empty(), "container is empty");
        // SAFETY: non-empty live range, exclusive access.
        unsafe { &mut *self.data.obj_end.sub(1) }
    }

    // growth plumbing

    /// Relocates everything into a fresh block of `[min_bytes, max_bytes]`
    /// with the live window starting `obj_offset` elements in.
    fn move_to_new_allocation(&mut self, min_bytes: usize, max_bytes: usize, obj_offset: usize) {
        let len = self.len();
        contract!(
            (obj_offset + len) * mem::size_of::<T>() <= min_bytes,
            "allocation too small for offset plus live elements"
        );

        let mut fresh = ByteAllocation::<T>::empty_bytes_raw(
            min_bytes,
            max_bytes,
            Self::ALLOC_ALIGNMENT,
            self.data.custom_resource,
            obj_offset,
        );
        // SAFETY: the fresh block has room for `len` elements at the offset;
        // the source range is live and disjoint. Afterwards the old elements
        // are logically dead, so the old live window is emptied before the
        // old allocation drops.
        unsafe {
            lifetime::relocate(self.data.obj_start, fresh.obj_start, len);
            fresh.obj_end = fresh.obj_start.add(len);
            self.data.obj_end = self.data.obj_start;
        }
        log::trace!(
            "container relocated: {len} elements into {min_bytes}..={max_bytes} byte block"
        );
        self.data = fresh;
    }

    /// Cold half of the append path when back capacity is exhausted.
    ///
    /// Tries an in-place resize first; `None` means the existing storage now
    /// has room and `data.obj_end` stays the construction target. Otherwise
    /// returns a fresh allocation whose (empty) live window sits where the
    /// NEW elements belong — past the slots the old elements will later be
    /// relocated into. Tracking only the new elements means a panicking
    /// constructor destroys exactly what was built so far and nothing else.
    #[cold]
    fn ensure_capacity_back_begin(&mut self, count: usize) -> Option<ByteAllocation<T>> {
        contract!(
            !self.has_capacity_back_for(count),
            "capacity is already sufficient"
        );

        let front_kept = if USES_CAPACITY_FRONT {
            self.capacity_front()
        } else {
            0
        };
        let len = self.len();

        let min_bytes = Self::alloc_grow_size_for(
            (front_kept + len) * mem::size_of::<T>(),
            (front_kept + len + count) * mem::size_of::<T>(),
        );
        let max_bytes = min_bytes + min_bytes.min(Self::ALLOC_MAX_SLACK);

        if self.data.try_resize_in_place(min_bytes, max_bytes) {
            return None;
        }

        let mut fresh = ByteAllocation::<T>::empty_bytes_raw(
            min_bytes,
            max_bytes,
            Self::ALLOC_ALIGNMENT,
            self.data.custom_resource,
            0,
        );
        // SAFETY: front_kept + len elements fit below min_bytes by the grow
        // computation, so the shifted window stays inside the block.
        unsafe {
            fresh.obj_start = fresh.obj_start.add(front_kept + len);
            fresh.obj_end = fresh.obj_start;
        }
        log::trace!("container growing into fresh {min_bytes} byte block");
        Some(fresh)
    }

    /// Hot-path finalizer: relocates the old elements below the newly
    /// constructed ones and swaps the allocation in.
    #[cold]
    fn ensure_capacity_back_finalize(&mut self, mut fresh: ByteAllocation<T>) {
        let len = self.len();
        // SAFETY: `fresh.obj_start` was placed `front_kept + len` elements
        // into the block, so `len` slots below it are allocated and
        // uninitialized; the source is live and disjoint. The old live
        // window is emptied so the old allocation drops bytes only.
        unsafe {
            let dst = fresh.obj_start.sub(len);
            lifetime::relocate(self.data.obj_start, dst, len);
            fresh.obj_start = dst;
            self.data.obj_end = self.data.obj_start;
        }
        self.data = fresh;
    }

    // reserve / resize

    /// Guarantees room for `count` more elements at the back, growing
    /// exponentially. No-op when capacity suffices.
    pub fn reserve_back(&mut self, count: usize) {
        if self.has_capacity_back_for(count) {
            return;
        }

        // in place first: keeps front capacity implicitly by growing the
        // current block
        let curr = self.data.alloc_size_bytes();
        let inplace_min =
            Self::alloc_grow_size_for(curr, curr + count * mem::size_of::<T>());
        let inplace_max = inplace_min + inplace_min.min(Self::ALLOC_MAX_SLACK);
        if self.data.try_resize_in_place(inplace_min, inplace_max) {
            return;
        }

        let front_kept = if USES_CAPACITY_FRONT {
            self.capacity_front()
        } else {
            0
        };
        let len = self.len();
        let min_bytes = Self::alloc_grow_size_for(
            (front_kept + len) * mem::size_of::<T>(),
            (front_kept + len + count) * mem::size_of::<T>(),
        );
        let max_bytes = min_bytes + min_bytes.min(Self::ALLOC_MAX_SLACK);
        self.move_to_new_allocation(min_bytes, max_bytes, front_kept);
    }

    /// Guarantees room for exactly `count` more elements at the back
    /// without exponential headroom (only cache-line rounding).
    pub fn reserve_back_exact(&mut self, count: usize) {
        if self.has_capacity_back_for(count) {
            return;
        }

        let inplace = align_up(
            self.data.alloc_size_bytes() + count * mem::size_of::<T>(),
            Self::ALLOC_ALIGNMENT,
        );
        if self.data.try_resize_in_place(inplace, inplace) {
            return;
        }

        let front_kept = if USES_CAPACITY_FRONT {
            self.capacity_front()
        } else {
            0
        };
        let len = self.len();
        let bytes = align_up(
            (front_kept + len + count) * mem::size_of::<T>(),
            Self::ALLOC_ALIGNMENT,
        );
        self.move_to_new_allocation(bytes, bytes, front_kept);
    }

    /// Guarantees room for `count` more elements at the front, growing
    /// exponentially. Relocates with exactly `count` slots of front
    /// capacity.
    pub fn reserve_front(&mut self, count: usize) {
        if self.has_capacity_front_for(count) {
            return;
        }

        let curr = self.data.alloc_size_bytes();
        let needed = curr + count * mem::size_of::<T>();
        let min_bytes = Self::alloc_grow_size_for(curr, needed);
        let max_bytes = min_bytes + min_bytes.min(Self::ALLOC_MAX_SLACK);
        self.move_to_new_allocation(min_bytes, max_bytes, count);
    }

    /// Guarantees room for exactly `count` more elements at the front.
    pub fn reserve_front_exact(&mut self, count: usize) {
        if self.has_capacity_front_for(count) {
            return;
        }

        let bytes = align_up(
            self.data.alloc_size_bytes() + count * mem::size_of::<T>(),
            Self::ALLOC_ALIGNMENT,
        );
        self.move_to_new_allocation(bytes, bytes, count);
    }

    /// Reduces the allocation to the tight size for the current elements
    /// (cache-line rounded, no front capacity). Idempotent; a no-op when
    /// already tight.
    pub fn shrink_to_fit(&mut self) {
        let tight = align_up(self.len() * mem::size_of::<T>(), Self::ALLOC_ALIGNMENT);
        if self.data.alloc_size_bytes() == tight {
            return;
        }
        self.move_to_new_allocation(tight, tight, 0);
    }

    /// Destroys all elements (reverse order); keeps the storage and
    /// `obj_start`.
    pub fn clear(&mut self) {
        // SAFETY: the live window is exactly the initialized range.
        unsafe { lifetime::destroy_in_reverse(self.data.obj_start, self.data.obj_end) };
        self.data.obj_end = self.data.obj_start;
    }

    /// Shrinks to `new_len` by destroying trailing elements in reverse.
    /// Precondition: `new_len <= len()`. Never reallocates.
    pub fn resize_down_to(&mut self, new_len: usize) {
        contract!(new_len <= self.len(), "resize_down_to cannot grow");
        // SAFETY: the destroyed tail is live; the window shrinks to match.
        unsafe {
            let new_end = self.data.obj_start.add(new_len);
            lifetime::destroy_in_reverse(new_end, self.data.obj_end);
            self.data.obj_end = new_end;
        }
    }

    /// Resizes to `new_len`, constructing appended elements with `make`.
    /// Shrinking destroys trailing elements. The old storage stays alive
    /// while new elements are constructed, so `make` may read existing
    /// element data it captured.
    pub fn resize_to_with(&mut self, new_len: usize, mut make: impl FnMut() -> T) {
        if new_len <= self.len() {
            return self.resize_down_to(new_len);
        }

        let count = new_len - self.len();
        let mut fresh = if self.has_capacity_back_for(count) {
            None
        } else {
            self.ensure_capacity_back_begin(count)
        };

        {
            let target = match fresh.as_mut() {
                Some(alloc) => alloc,
                None => &mut self.data,
            };
            // SAFETY: `target` has back capacity for `count` elements and
            // `obj_end` is its live-end cursor; a panic in `make` leaves
            // the constructed prefix owned by `target`.
            unsafe { lifetime::with_create_to(&mut target.obj_end, count, &mut make) };
        }

        if let Some(fresh) = fresh {
            self.ensure_capacity_back_finalize(fresh);
        }
    }

    /// Resizes to `new_len`, default-constructing appended elements.
    pub fn resize_to_defaulted(&mut self, new_len: usize)
    where
        T: Default,
    {
        self.resize_to_with(new_len, T::default);
    }

    /// Resizes to `new_len`, filling appended elements with clones of
    /// `value`.
    pub fn resize_to_filled(&mut self, new_len: usize, value: &T)
    where
        T: Clone,
    {
        self.resize_to_with(new_len, || value.clone());
    }

    /// Resizes to `new_len` without initializing appended elements.
    /// Existing content is preserved across a relocation.
    ///
    /// # Safety
    /// Appended elements must be written before they are read.
    pub unsafe fn resize_to_uninitialized(&mut self, new_len: usize)
    where
        T: Copy,
    {
        if new_len <= self.len() {
            self.data.obj_end = self.data.obj_start.add(new_len);
            return;
        }
        let count = new_len - self.len();
        self.reserve_back(count);
        self.data.obj_end = self.data.obj_start.add(new_len);
    }

    /// Destroys all elements, then resizes to `new_len` constructing every
    /// element with `make`.
    pub fn clear_resize_to_with(&mut self, new_len: usize, mut make: impl FnMut() -> T) {
        self.clear();
        self.reserve_back(new_len);
        // SAFETY: capacity was just reserved; `obj_end` is the live cursor.
        unsafe { lifetime::with_create_to(&mut self.data.obj_end, new_len, &mut make) };
    }

    /// Destroys all elements, then resizes to `new_len` default
    /// elements.
    pub fn clear_resize_to_defaulted(&mut self, new_len: usize)
    where
        T: Default,
    {
        self.clear_resize_to_with(new_len, T::default);
    }

    /// Destroys all elements, then resizes to `new_len` clones of `value`.
    pub fn clear_resize_to_filled(&mut self, new_len: usize, value: &T)
    where
        T: Clone,
    {
        self.clear_resize_to_with(new_len, || value.clone());
    }

    /// Destroys all elements and declares `new_len` uninitialized ones.
    /// Repositions the live window to the block base to reclaim any front
    /// capacity before reserving.
    ///
    /// # Safety
    /// Every element must be written before it is read.
    pub unsafe fn clear_resize_to_uninitialized(&mut self, new_len: usize)
    where
        T: Copy,
    {
        if new_len <= self.len() {
            self.data.obj_end = self.data.obj_start.add(new_len);
            return;
        }

        // reclaim front capacity: restart the window at the aligned base
        if !self.data.alloc_start.is_null() {
            let aligned =
                align_up(self.data.alloc_start as usize, mem::align_of::<T>()) as *mut T;
            self.data.obj_start = aligned;
            self.data.obj_end = aligned;
        }
        self.reserve_back(new_len);
        self.data.obj_end = self.data.obj_start.add(new_len);
    }

    // appends

    /// Appends at the back using existing capacity; never reallocates, so
    /// all references stay valid. Precondition:
    /// `has_capacity_back_for(1)`.
    pub fn push_back_stable(&mut self, value: T) -> &mut T {
        contract!(
            self.has_capacity_back_for(1),
            "not enough capacity for push_back_stable"
        );
        // SAFETY: one free slot exists at obj_end; the cursor moves after
        // the write.
        unsafe {
            let p = self.data.obj_end;
            ptr::write(p, value);
            self.data.obj_end = p.add(1);
            &mut *p
        }
    }

    /// Prepends at the front using existing capacity; never reallocates.
    /// Precondition: `has_capacity_front_for(1)`.
    pub fn push_front_stable(&mut self, value: T) -> &mut T {
        contract!(
            self.has_capacity_front_for(1),
            "not enough capacity for push_front_stable"
        );
        // SAFETY: one free slot exists below obj_start; the cursor moves
        // after the write.
        unsafe {
            let p = self.data.obj_start.sub(1);
            ptr::write(p, value);
            self.data.obj_start = p;
            &mut *p
        }
    }

    /// Appends at the back, growing if needed. With capacity available no
    /// invalidation occurs; otherwise see the module-level guarantees.
    /// Amortized O(1).
    pub fn push_back(&mut self, value: T) -> &mut T {
        self.push_back_with(move || value)
    }

    /// Appends the result of `make` at the back, growing if needed.
    ///
    /// This is the single-construction-site primitive: `make` runs exactly
    /// once, BEFORE any old element is relocated, so a panic leaves the
    /// container untouched.
    pub fn push_back_with(&mut self, make: impl FnOnce() -> T) -> &mut T {
        let mut fresh = if self.has_capacity_back_for(1) {
            None
        } else {
            self.ensure_capacity_back_begin(1)
        };

        let p = {
            let target = match fresh.as_mut() {
                Some(alloc) => alloc,
                None => &mut self.data,
            };
            // SAFETY: `target` has a free slot at obj_end; the cursor moves
            // only after construction succeeded.
            unsafe {
                let p = target.obj_end;
                ptr::write(p, make());
                target.obj_end = p.add(1);
                p
            }
        };

        if let Some(fresh) = fresh {
            self.ensure_capacity_back_finalize(fresh);
        }

        // SAFETY: the new element was constructed at its final address; the
        // finalizer relocates only the OLD elements.
        unsafe { &mut *p }
    }

    // removal

    /// Removes and returns the last element. Precondition: not empty.
    #[must_use = "use remove_back() if you don't need the return value"]
    pub fn pop_back(&mut self) -> T {
        contract!(!self.is_empty(), "cannot pop from an empty container");
        // SAFETY: the last slot is live; shrinking the window first makes
        // the value's ownership unambiguous.
        unsafe {
            self.data.obj_end = self.data.obj_end.sub(1);
            ptr::read(self.data.obj_end)
        }
    }

    /// Removes the last element in place (no extra move). Precondition:
    /// not empty.
    pub fn remove_back(&mut self) {
        contract!(!self.is_empty(), "cannot remove from an empty container");
        // SAFETY: the last slot is live and leaves the window before drop.
        unsafe {
            self.data.obj_end = self.data.obj_end.sub(1);
            ptr::drop_in_place(self.data.obj_end);
        }
    }

    /// Removes and returns the first element. Precondition: not empty.
    #[must_use = "use remove_front() if you don't need the return value"]
    pub fn pop_front(&mut self) -> T {
        contract!(!self.is_empty(), "cannot pop from an empty container");
        // SAFETY: the first slot is live; the window shrinks from the front,
        // which grows front capacity.
        unsafe {
            let value = ptr::read(self.data.obj_start);
            self.data.obj_start = self.data.obj_start.add(1);
            value
        }
    }

    /// Removes the first element in place. Precondition: not empty.
    pub fn remove_front(&mut self) {
        contract!(!self.is_empty(), "cannot remove from an empty container");
        // SAFETY: the first slot is live and leaves the window before drop.
        unsafe {
            let p = self.data.obj_start;
            self.data.obj_start = p.add(1);
            ptr::drop_in_place(p);
        }
    }

    /// Removes and returns the element at `idx`, preserving order. O(n).
    #[must_use = "use remove_at() if you don't need the return value"]
    pub fn pop_at(&mut self, idx: usize) -> T {
        let len = self.len();
        contract!(idx < len, "index out of bounds");
        // SAFETY: slot `idx` is live; the tail shifts into the gap and the
        // window shrinks by one, so no slot is dropped twice.
        unsafe {
            let p = self.data.obj_start.add(idx);
            let value = ptr::read(p);
            ptr::copy(p.add(1), p, len - idx - 1);
            self.data.obj_end = self.data.obj_end.sub(1);
            value
        }
    }

    /// Removes the element at `idx`, preserving order. O(n).
    pub fn remove_at(&mut self, idx: usize) {
        let len = self.len();
        contract!(idx < len, "index out of bounds");
        // SAFETY: as in `pop_at`, with the removed element dropped in place.
        unsafe {
            let p = self.data.obj_start.add(idx);
            ptr::drop_in_place(p);
            ptr::copy(p.add(1), p, len - idx - 1);
            self.data.obj_end = self.data.obj_end.sub(1);
        }
    }

    /// Removes and returns the element at `idx` by swapping in the last
    /// element. O(1); does not preserve order.
    #[must_use = "use remove_at_unordered() if you don't need the return value"]
    pub fn pop_at_unordered(&mut self, idx: usize) -> T {
        let len = self.len();
        contract!(idx < len, "index out of bounds");
        // SAFETY: slot `idx` is live; the last element fills the gap unless
        // it IS the gap.
        unsafe {
            let p = self.data.obj_start.add(idx);
            let value = ptr::read(p);
            self.data.obj_end = self.data.obj_end.sub(1);
            if p != self.data.obj_end {
                ptr::copy_nonoverlapping(self.data.obj_end, p, 1);
            }
            value
        }
    }

    /// Removes the element at `idx` by swapping in the last element. O(1);
    /// does not preserve order.
    pub fn remove_at_unordered(&mut self, idx: usize) {
        let len = self.len();
        contract!(idx < len, "index out of bounds");
        // SAFETY: as in `pop_at_unordered`, dropping the removed element in
        // place.
        unsafe {
            let p = self.data.obj_start.add(idx);
            ptr::drop_in_place(p);
            self.data.obj_end = self.data.obj_end.sub(1);
            if p != self.data.obj_end {
                ptr::copy_nonoverlapping(self.data.obj_end, p, 1);
            }
        }
    }

    /// Removes `count` elements starting at `start`, preserving the order
    /// of the survivors. O(n).
    pub fn remove_at_range(&mut self, start: usize, count: usize) {
        let len = self.len();
        contract!(
            start <= len && count <= len - start,
            "range out of bounds"
        );
        if count == 0 {
            return;
        }
        // SAFETY: the gap is live and dropped exactly once; the tail shifts
        // down and the window shrinks accordingly.
        unsafe {
            let gap = self.data.obj_start.add(start);
            lifetime::destroy_in_reverse(gap, gap.add(count));
            ptr::copy(gap.add(count), gap, len - start - count);
            self.data.obj_end = self.data.obj_start.add(len - count);
        }
    }

    /// Removes the range `[start, end)`, preserving order.
    pub fn remove_from_to(&mut self, start: usize, end: usize) {
        contract!(start <= end && end <= self.len(), "range out of bounds");
        self.remove_at_range(start, end - start);
    }

    /// Removes `count` elements starting at `start` by moving trailing
    /// elements into the gap. O(count); does not preserve order.
    pub fn remove_at_range_unordered(&mut self, start: usize, count: usize) {
        let len = self.len();
        contract!(
            start <= len && count <= len - start,
            "range out of bounds"
        );
        if count == 0 {
            return;
        }
        // Only the part of the tail that does not itself overlap the gap
        // needs to move.
        let moved = count.min(len - start - count);
        // SAFETY: gap slots are dropped once; the moved source lies fully
        // past the gap, so the copy is nonoverlapping.
        unsafe {
            let gap = self.data.obj_start.add(start);
            lifetime::destroy_in_reverse(gap, gap.add(count));
            ptr::copy_nonoverlapping(self.data.obj_start.add(len - moved), gap, moved);
            self.data.obj_end = self.data.obj_start.add(len - count);
        }
    }

    /// Removes the range `[start, end)` without preserving order.
    pub fn remove_from_to_unordered(&mut self, start: usize, end: usize) {
        contract!(start <= end && end <= self.len(), "range out of bounds");
        self.remove_at_range_unordered(start, end - start);
    }

    /// Removes every element for which `pred` returns true, preserving the
    /// order of survivors. Returns the number removed. Single pass with
    /// forward compaction; survivors may change address.
    pub fn remove_all_where(&mut self, mut pred: impl FnMut(&mut T) -> bool) -> usize {
        let original_len = self.len();
        if original_len == 0 {
            return 0;
        }
        let start = self.data.obj_start;

        struct BackshiftOnDrop<'a, T, const F: bool> {
            container: &'a mut AllocatingContainer<T, F>,
            processed: usize,
            deleted: usize,
            original_len: usize,
        }

        impl<T, const F: bool> Drop for BackshiftOnDrop<'_, T, F> {
            fn drop(&mut self) {
                let start = self.container.data.obj_start;
                // SAFETY: [processed, original_len) are untouched live slots;
                // shifting them over the holes restores one contiguous live
                // range of original_len - deleted elements.
                unsafe {
                    if self.deleted > 0 {
                        let tail = self.original_len - self.processed;
                        ptr::copy(
                            start.add(self.processed),
                            start.add(self.processed - self.deleted),
                            tail,
                        );
                    }
                    self.container.data.obj_end =
                        start.add(self.original_len - self.deleted);
                }
            }
        }

        // Empty the live window for the duration: if `pred` unwinds, only
        // the guard's view of the range is authoritative and no slot can be
        // dropped twice.
        self.data.obj_end = start;
        let mut guard = BackshiftOnDrop {
            container: self,
            processed: 0,
            deleted: 0,
            original_len,
        };

        while guard.processed < original_len {
            // SAFETY: slots at `processed` and beyond have not been moved
            // or dropped yet. The pointer is re-derived from the guard so
            // it stays valid under aliasing rules.
            let cur = unsafe { guard.container.data.obj_start.add(guard.processed) };
            if pred(unsafe { &mut *cur }) {
                guard.processed += 1;
                guard.deleted += 1;
                // SAFETY: counted as deleted before the drop so a panicking
                // Drop still excludes this slot from the compacted range.
                unsafe { ptr::drop_in_place(cur) };
            } else {
                if guard.deleted > 0 {
                    // SAFETY: the hole slot was vacated by an earlier drop
                    // or shift.
                    unsafe { ptr::copy_nonoverlapping(cur, cur.sub(guard.deleted), 1) };
                }
                guard.processed += 1;
            }
        }

        let deleted = guard.deleted;
        drop(guard);
        deleted
    }

    /// Keeps only elements for which `pred` returns true; the dual of
    /// [`Self::remove_all_where`]. Returns the number removed.
    pub fn retain_all_where(&mut self, mut pred: impl FnMut(&mut T) -> bool) -> usize {
        self.remove_all_where(|element| !pred(element))
    }

    /// Removes the first element matching `pred`; returns its index. Stops
    /// probing after the first match.
    pub fn remove_first_where(&mut self, mut pred: impl FnMut(&mut T) -> bool) -> Option<usize> {
        for idx in 0..self.len() {
            // SAFETY: idx < len, slot is live.
            let element = unsafe { &mut *self.data.obj_start.add(idx) };
            if pred(element) {
                self.remove_at(idx);
                return Some(idx);
            }
        }
        None
    }

    /// Removes the last element matching `pred` (scanning backward);
    /// returns its index.
    pub fn remove_last_where(&mut self, mut pred: impl FnMut(&mut T) -> bool) -> Option<usize> {
        for idx in (0..self.len()).rev() {
            // SAFETY: idx < len, slot is live.
            let element = unsafe { &mut *self.data.obj_start.add(idx) };
            if pred(element) {
                self.remove_at(idx);
                return Some(idx);
            }
        }
        None
    }

    /// Removes every element equal to `value`; returns the number removed.
    pub fn remove_all_value(&mut self, value: &T) -> usize
    where
        T: PartialEq,
    {
        self.remove_all_where(|element| *element == *value)
    }

    /// Removes the first element equal to `value`; returns its index.
    pub fn remove_first_value(&mut self, value: &T) -> Option<usize>
    where
        T: PartialEq,
    {
        self.remove_first_where(|element| *element == *value)
    }

    /// Removes the last element equal to `value`; returns its index.
    pub fn remove_last_value(&mut self, value: &T) -> Option<usize>
    where
        T: PartialEq,
    {
        self.remove_last_where(|element| *element == *value)
    }

    // other mutations

    /// Overwrites every element with a clone of `value`.
    pub fn fill(&mut self, value: &T)
    where
        T: Clone,
    {
        for slot in self.as_mut_slice() {
            slot.clone_from(value);
        }
    }
}

impl<T: Clone, const F: bool> Clone for AllocatingContainer<T, F> {
    /// Deep copy carrying the source's resource.
    fn clone(&self) -> Self {
        let byte_size = align_up(self.len() * mem::size_of::<T>(), Self::ALLOC_ALIGNMENT);
        let mut data = ByteAllocation::<T>::empty_bytes_raw(
            byte_size,
            byte_size,
            Self::ALLOC_ALIGNMENT,
            self.data.custom_resource,
            0,
        );
        // SAFETY: the fresh block has room for all elements.
        unsafe { lifetime::clone_create_to(&mut data.obj_end, self.as_slice()) };
        Self { data }
    }

    /// Deep copy that KEEPS the destination's resource: the new storage is
    /// allocated from `self`'s resource before the old storage is released.
    fn clone_from(&mut self, source: &Self) {
        let byte_size = align_up(source.len() * mem::size_of::<T>(), Self::ALLOC_ALIGNMENT);
        let mut fresh = ByteAllocation::<T>::empty_bytes_raw(
            byte_size,
            byte_size,
            Self::ALLOC_ALIGNMENT,
            self.data.custom_resource,
            0,
        );
        // SAFETY: the fresh block has room for all source elements.
        unsafe { lifetime::clone_create_to(&mut fresh.obj_end, source.as_slice()) };
        self.data = fresh;
    }
}

impl<T, const F: bool> Index<usize> for AllocatingContainer<T, F> {
    type Output = T;

    #[inline]
    fn index(&self, idx: usize) -> &T {
        contract!(idx < self.len(), "index out of bounds");
        // SAFETY: bounds checked above.
        unsafe { &*self.data.obj_start.add(idx) }
    }
}

impl<T, const F: bool> IndexMut<usize> for AllocatingContainer<T, F> {
    #[inline]
    fn index_mut(&mut self, idx: usize) -> &mut T {
        contract!(idx < self.len(), "index out of bounds");
        // SAFETY: bounds checked above; exclusive access.
        unsafe { &mut *self.data.obj_start.add(idx) }
    }
}

impl<'a, T, const F: bool> IntoIterator for &'a AllocatingContainer<T, F> {
    type Item = &'a T;
    type IntoIter = core::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.as_slice().iter()
    }
}

impl<'a, T, const F: bool> IntoIterator for &'a mut AllocatingContainer<T, F> {
    type Item = &'a mut T;
    type IntoIter = core::slice::IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.as_mut_slice().iter_mut()
    }
}

impl<T: core::fmt::Debug, const F: bool> core::fmt::Debug for AllocatingContainer<T, F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

impl<T: PartialEq, const F: bool> PartialEq for AllocatingContainer<T, F> {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<T: Eq, const F: bool> Eq for AllocatingContainer<T, F> {}
