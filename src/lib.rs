//! Deterministic, allocator-aware containers and memory primitives for
//! systems software.
//!
//! This crate is a foundation layer built around one idea: separate the
//! bytes a data structure *owns* from the objects that are currently
//! *alive* inside them, and make the allocator a plain, pluggable value.
//!
//! # The pieces
//!
//! * [`MemoryResource`] — a polymorphic byte allocator as a struct of four
//!   function pointers plus opaque userdata (the `RawWakerVTable` shape).
//!   It allocates size *ranges* (`min..=max`) and offers in-place resize
//!   instead of `realloc`: a resource never moves an allocation, so
//!   interior pointers stay valid while containers grow.
//! * [`ByteAllocation`] — an owning handle pairing an owned byte block
//!   with a typed live window inside it. All contiguous containers here
//!   are built on it, which gives them a uniform escape hatch: allocations
//!   can be extracted, adopted and handed between container types without
//!   copying.
//! * [`AllocatingContainer`] — the shared container core: capacity is
//!   directional (front/back), growth is panic-safe and relocation-aware,
//!   removal comes in ordered and `O(1)` unordered flavors, and
//!   `_stable` operations promise to never invalidate references.
//! * [`node`] — a thread-local, size-classed slab allocator for small
//!   nodes. Freeing needs only the pointer: the slab base falls out of
//!   address arithmetic and the slot returns with one wait-free atomic OR,
//!   from any thread. [`NodeHandle`] is the matching move-only owner.
//! * [`SmallString`] — a 48-byte string storing up to 39 bytes inline,
//!   tagging its mode in the low bit of its sticky resource pointer and
//!   reusing the allocating container for heap storage.
//!
//! # Contracts, not panics
//!
//! Precondition violations (out-of-bounds indexing, popping an empty
//! container, mismatched deallocation sizes) route through the
//! [`contract`] module: a stack of user-installable handlers with
//! print-and-abort as the default. Embedders and tests can push a handler
//! that panics to turn contract violations into unwinds.
//!
//! # Threading model
//!
//! Containers are not synchronized; callers serialize mutation. The only
//! concurrent primitive is the node resource's free path, which is
//! wait-free and safe from any thread by construction (a slot bit is
//! cleared only by its owning thread and set only after it was cleared).
//!
//! # Example
//!
//! ```
//! use keel::{NodeHandle, SmallString, Vector};
//!
//! let mut numbers = Vector::new();
//! numbers.push_back(10);
//! numbers.push_back(20);
//! numbers.push_back(30);
//! assert_eq!(numbers.remove_all_where(|n| *n == 20), 1);
//! assert_eq!(numbers.as_slice(), &[10, 30]);
//!
//! let mut text = SmallString::from("inline for up to 39 bytes");
//! text.push_str(", heap afterwards");
//! assert!(text.is_heap());
//!
//! let boxed = NodeHandle::new([1u32, 2, 3]);
//! assert_eq!(boxed[2], 3);
//! ```

#[macro_use]
pub mod contract;

pub mod allocation;
pub mod container;
pub mod lifetime;
pub mod node;
pub mod resource;
pub mod string;
pub mod util;

pub use allocation::ByteAllocation;
pub use container::vector::Vector;
pub use container::AllocatingContainer;
pub use contract::{AssertionInfo, ScopedAssertionHandler};
pub use node::{ClassIndex, NodeAllocator, NodeHandle, NodeResource, DEFAULT_NODE_RESOURCE};
pub use resource::{MemoryResource, RawBytes, DEFAULT_MEMORY_RESOURCE};
pub use string::SmallString;
