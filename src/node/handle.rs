//! [`NodeHandle`]: a move-only owning pointer for node-allocated values.

use core::mem;
use core::ops::{Deref, DerefMut};
use core::ptr;

use crate::node::{
    free_node, free_node_large, with_default_node_allocator, ClassIndex,
};

/// Owning handle for a single `T` stored in node memory.
///
/// The handle is a single pointer. Everything needed to free the slot is
/// derived from the pointer value and `size_of/align_of::<T>()`: small
/// nodes recover their slab and slot from address arithmetic, large nodes
/// read the header stored directly below the user pointer. No allocator or
/// resource reference is carried, so dropping is possible on any thread at
/// any time — the slot return is a single wait-free atomic OR.
///
/// There is no empty handle state; use `Option<NodeHandle<T>>`, which is
/// still pointer-sized through the non-null niche.
pub struct NodeHandle<T> {
    ptr: ptr::NonNull<T>,
}

// SAFETY: the handle owns its T; freeing from another thread is an
// explicitly supported wait-free operation.
unsafe impl<T: Send> Send for NodeHandle<T> {}
// SAFETY: shared access exposes only &T.
unsafe impl<T: Sync> Sync for NodeHandle<T> {}

impl<T> NodeHandle<T> {
    /// Size class of `T` nodes, fixed at compile time.
    pub const CLASS_INDEX: ClassIndex = ClassIndex::for_type::<T>();

    const NOT_ZST: () = assert!(
        mem::size_of::<T>() != 0,
        "zero-sized types do not need node storage"
    );

    /// Allocates a node from the calling thread's default allocator and
    /// moves `value` into it.
    #[must_use]
    pub fn new(value: T) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::NOT_ZST;

        let idx = Self::CLASS_INDEX;
        let raw = with_default_node_allocator(|allocator| {
            if idx.is_small() {
                allocator.allocate_node_bytes(idx)
            } else {
                allocator.allocate_node_bytes_large(idx, mem::size_of::<T>(), mem::align_of::<T>())
            }
        });

        let typed = raw.cast::<T>();
        // SAFETY: the slot covers size and alignment of T by class-index
        // construction (small) or by explicit request (large).
        unsafe { typed.write(value) };
        Self {
            // SAFETY: allocation is fatal on failure, the pointer is
            // non-null.
            ptr: unsafe { ptr::NonNull::new_unchecked(typed) },
        }
    }

    /// The raw node pointer.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// Moves the value out and returns the slot without running `T`'s drop
    /// glue on the (now moved) storage.
    #[must_use]
    pub fn into_inner(self) -> T {
        let raw = self.ptr.as_ptr();
        mem::forget(self);
        // SAFETY: the slot holds a live T that is moved out exactly once;
        // the slot itself is returned afterwards.
        unsafe {
            let value = raw.read();
            Self::release_slot(raw);
            value
        }
    }

    /// Returns the slot to its slab (or the large path) WITHOUT touching
    /// the contents.
    ///
    /// # Safety
    /// `raw` must be a live node pointer of this handle type whose value
    /// has already been dropped or moved out.
    unsafe fn release_slot(raw: *mut T) {
        if Self::CLASS_INDEX.is_small() {
            free_node(raw.cast::<u8>(), Self::CLASS_INDEX);
        } else {
            free_node_large(raw.cast::<u8>(), Self::CLASS_INDEX);
        }
    }
}

impl<T> Drop for NodeHandle<T> {
    fn drop(&mut self) {
        let raw = self.ptr.as_ptr();
        // SAFETY: the handle owns a live T; after the drop the slot is dead
        // storage and is returned exactly once.
        unsafe {
            ptr::drop_in_place(raw);
            Self::release_slot(raw);
        }
    }
}

impl<T> Deref for NodeHandle<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: the handle owns a live T.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> DerefMut for NodeHandle<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the handle owns a live T, exclusively.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for NodeHandle<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("NodeHandle").field(&**self).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::NodeHandle;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn stores_and_derefs() {
        let mut handle = NodeHandle::new(41u64);
        assert_eq!(*handle, 41);
        *handle += 1;
        assert_eq!(*handle, 42);
    }

    #[test]
    fn drop_runs_the_destructor() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);
        struct Counting;
        impl Drop for Counting {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::Relaxed);
            }
        }

        DROPS.store(0, Ordering::Relaxed);
        let handle = NodeHandle::new(Counting);
        drop(handle);
        assert_eq!(DROPS.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn into_inner_skips_the_slot_drop() {
        let handle = NodeHandle::new(String::from("payload"));
        let value = handle.into_inner();
        assert_eq!(value, "payload");
    }

    #[test]
    fn large_nodes_round_trip() {
        // 1 KiB payload: far beyond the small-class boundary
        let data = [7u8; 1024];
        let handle = NodeHandle::new(data);
        assert!(!NodeHandle::<[u8; 1024]>::CLASS_INDEX.is_small());
        assert_eq!(handle[0], 7);
        assert_eq!(handle[1023], 7);
        drop(handle);
    }

    #[test]
    fn option_is_pointer_sized() {
        assert_eq!(
            core::mem::size_of::<Option<NodeHandle<u64>>>(),
            core::mem::size_of::<*mut u64>()
        );
    }
}
