//! End-to-end coverage of the node resource and `NodeHandle`.

use std::collections::BTreeSet;

use proptest::prelude::*;

use keel::node::{
    free_node, freemap_of, slab_base_of, with_default_node_allocator, ClassIndex,
};
use keel::NodeHandle;

#[test]
fn alloc_free_symmetry_with_500_nodes() {
    // u64 nodes: class size 8, 62 usable slots per slab (2 blocked)
    const N: usize = 500;
    let idx = NodeHandle::<u64>::CLASS_INDEX;
    assert_eq!(idx.class_size(), 8);

    let mut slabs = BTreeSet::new();
    let mut handles = Vec::new();
    for i in 0..N {
        let handle = NodeHandle::new(i as u64);
        slabs.insert(slab_base_of(handle.as_ptr().cast::<u8>(), idx) as usize);
        handles.push(handle);
    }
    for (i, handle) in handles.iter().enumerate() {
        assert_eq!(**handle, i as u64);
    }
    handles.clear(); // drop in forward order

    // second wave reuses the freed slots
    let mut again = Vec::new();
    for i in 0..N {
        let handle = NodeHandle::new((i * 3) as u64);
        slabs.insert(slab_base_of(handle.as_ptr().cast::<u8>(), idx) as usize);
        again.push(handle);
    }
    for (i, handle) in again.iter().enumerate() {
        assert_eq!(**handle, (i * 3) as u64);
    }

    // both waves together touched at most ceil(500/60) + 1 distinct slabs
    assert!(
        slabs.len() <= N / 60 + 2,
        "expected slab reuse, saw {} slabs",
        slabs.len()
    );
}

#[test]
fn dropping_in_any_order_restores_the_freemaps() {
    let idx = NodeHandle::<u32>::CLASS_INDEX;
    let mut handles = Vec::new();
    for i in 0..100u32 {
        handles.push(NodeHandle::new(i));
    }
    let slabs: BTreeSet<usize> = handles
        .iter()
        .map(|h| slab_base_of(h.as_ptr().cast::<u8>(), idx) as usize)
        .collect();

    // interleaved drop order: evens forward, odds backward
    let mut evens = Vec::new();
    let mut odds = Vec::new();
    for (i, handle) in handles.drain(..).enumerate() {
        if i % 2 == 0 {
            evens.push(handle);
        } else {
            odds.push(handle);
        }
    }
    drop(evens);
    odds.reverse();
    drop(odds);

    for base in slabs {
        let freemap = unsafe { freemap_of(base as *mut u8) };
        assert_eq!(
            freemap.load(std::sync::atomic::Ordering::Acquire),
            idx.initial_freemap(),
            "slab at {base:#x} did not return to its initial freemap"
        );
    }
}

#[test]
fn remote_frees_are_discovered_by_the_owner() {
    let idx = NodeHandle::<[u64; 2]>::CLASS_INDEX;

    // fill slots on this thread, free them on another
    let handles: Vec<NodeHandle<[u64; 2]>> =
        (0..64).map(|i| NodeHandle::new([i as u64, 0])).collect();
    let slabs: BTreeSet<usize> = handles
        .iter()
        .map(|h| slab_base_of(h.as_ptr().cast::<u8>(), idx) as usize)
        .collect();

    std::thread::spawn(move || drop(handles))
        .join()
        .expect("freeing thread panicked");

    // the owner's next allocations must find the remotely freed slots
    // instead of growing the slab set
    let reused: Vec<NodeHandle<[u64; 2]>> =
        (0..64).map(|i| NodeHandle::new([0, i as u64])).collect();
    let reused_slabs: BTreeSet<usize> = reused
        .iter()
        .map(|h| slab_base_of(h.as_ptr().cast::<u8>(), idx) as usize)
        .collect();
    assert!(reused_slabs.is_subset(&slabs));
}

#[test]
fn concurrent_remote_frees_do_not_corrupt_the_bitmap() {
    let idx = NodeHandle::<u64>::CLASS_INDEX;
    for _round in 0..50 {
        let handles: Vec<NodeHandle<u64>> = (0..61).map(|i| NodeHandle::new(i as u64)).collect();
        let slabs: BTreeSet<usize> = handles
            .iter()
            .map(|h| slab_base_of(h.as_ptr().cast::<u8>(), idx) as usize)
            .collect();

        // split between two freeing threads racing on the same bitmaps
        let mut left = Vec::new();
        let mut right = Vec::new();
        for (i, handle) in handles.into_iter().enumerate() {
            if i % 2 == 0 {
                left.push(handle);
            } else {
                right.push(handle);
            }
        }
        let t1 = std::thread::spawn(move || drop(left));
        let t2 = std::thread::spawn(move || drop(right));
        t1.join().unwrap();
        t2.join().unwrap();

        for base in slabs {
            let freemap = unsafe { freemap_of(base as *mut u8) };
            let value = freemap.load(std::sync::atomic::Ordering::Acquire);
            assert_eq!(value & !idx.initial_freemap(), 0, "header bits flipped");
        }
    }
}

#[test]
fn handles_can_outlive_their_allocating_thread() {
    let handle = std::thread::spawn(|| NodeHandle::new(777u64))
        .join()
        .expect("allocating thread panicked");
    assert_eq!(*handle, 777);
    drop(handle); // remote free into a slab owned by a finished thread
}

#[test]
fn large_nodes_use_the_header_path() {
    #[repr(align(32))]
    struct BigAligned([u8; 512]);

    let idx = NodeHandle::<BigAligned>::CLASS_INDEX;
    assert!(!idx.is_small());

    let handle = NodeHandle::new(BigAligned([9; 512]));
    let addr = handle.as_ptr() as usize;
    assert_eq!(addr % 32, 0);
    assert!(handle.0.iter().all(|&b| b == 9));
    drop(handle);

    // plain 8-aligned large node
    let big = NodeHandle::new([1u64; 64]);
    assert!(!NodeHandle::<[u64; 64]>::CLASS_INDEX.is_small());
    assert_eq!(big[63], 1);
}

#[test]
fn into_inner_returns_the_slot() {
    let idx = NodeHandle::<u64>::CLASS_INDEX;
    let handle = NodeHandle::new(5u64);
    let ptr = handle.as_ptr().cast::<u8>();
    let base = slab_base_of(ptr, idx);
    let value = handle.into_inner();
    assert_eq!(value, 5);

    let bit = 1u64 << keel::node::slot_index_of(ptr, base, idx);
    let freemap = unsafe { freemap_of(base) };
    assert_ne!(
        freemap.load(std::sync::atomic::Ordering::Acquire) & bit,
        0,
        "slot must be free after into_inner"
    );
}

#[test]
fn raw_slot_allocation_round_trips() {
    let idx = ClassIndex::from_size_and_align(48, 8);
    assert_eq!(idx.class_size(), 64);

    let ptr = with_default_node_allocator(|alloc| alloc.allocate_node_bytes(idx));
    assert!(!ptr.is_null());
    assert_eq!(ptr as usize % 64, 0);
    unsafe {
        ptr.write_bytes(0x5A, 48);
        free_node(ptr, idx);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn random_drop_orders_restore_the_freemaps(
        count in 1usize..150,
        seed in any::<u64>(),
    ) {
        let idx = NodeHandle::<u128>::CLASS_INDEX;
        let mut handles: Vec<NodeHandle<u128>> =
            (0..count).map(|i| NodeHandle::new(i as u128)).collect();
        let slabs: BTreeSet<usize> = handles
            .iter()
            .map(|h| slab_base_of(h.as_ptr().cast::<u8>(), idx) as usize)
            .collect();

        // payloads survive an arbitrary interleaving of drops
        let mut state = seed;
        while !handles.is_empty() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let pick = (state >> 33) as usize % handles.len();
            let handle = handles.swap_remove(pick);
            prop_assert!(*handle < count as u128);
        }

        for base in slabs {
            let freemap = unsafe { freemap_of(base as *mut u8) };
            prop_assert_eq!(
                freemap.load(std::sync::atomic::Ordering::Acquire),
                idx.initial_freemap()
            );
        }
    }
}
