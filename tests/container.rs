//! End-to-end coverage of the allocating container and `Vector`.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use proptest::prelude::*;

use common::{counting_resource, Counters};
use keel::{MemoryResource, Vector};

/// Instrumented element: counts constructions/destructions and records the
/// drop order of values through a shared log.
#[derive(Clone)]
struct Tracked {
    value: i32,
    log: Arc<Mutex<Vec<i32>>>,
    live: Arc<AtomicUsize>,
    total_ctors: Arc<AtomicUsize>,
    total_dtors: Arc<AtomicUsize>,
}

struct TrackedFactory {
    log: Arc<Mutex<Vec<i32>>>,
    live: Arc<AtomicUsize>,
    total_ctors: Arc<AtomicUsize>,
    total_dtors: Arc<AtomicUsize>,
}

impl TrackedFactory {
    fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            live: Arc::new(AtomicUsize::new(0)),
            total_ctors: Arc::new(AtomicUsize::new(0)),
            total_dtors: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn make(&self, value: i32) -> Tracked {
        self.live.fetch_add(1, Ordering::Relaxed);
        self.total_ctors.fetch_add(1, Ordering::Relaxed);
        Tracked {
            value,
            log: self.log.clone(),
            live: self.live.clone(),
            total_ctors: self.total_ctors.clone(),
            total_dtors: self.total_dtors.clone(),
        }
    }

    fn drop_order(&self) -> Vec<i32> {
        self.log.lock().unwrap().clone()
    }

    fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    fn ctors(&self) -> usize {
        self.total_ctors.load(Ordering::Relaxed)
    }

    fn dtors(&self) -> usize {
        self.total_dtors.load(Ordering::Relaxed)
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
        self.total_dtors.fetch_add(1, Ordering::Relaxed);
        self.log.lock().unwrap().push(self.value);
    }
}

// Cloning a Tracked is a construction, too.
impl Tracked {
    fn cloned(&self) -> Tracked {
        self.live.fetch_add(1, Ordering::Relaxed);
        self.total_ctors.fetch_add(1, Ordering::Relaxed);
        Tracked {
            value: self.value,
            log: self.log.clone(),
            live: self.live.clone(),
            total_ctors: self.total_ctors.clone(),
            total_dtors: self.total_dtors.clone(),
        }
    }
}

#[test]
fn push_then_read() {
    let mut v = Vector::new();
    v.push_back(10);
    v.push_back(20);
    v.push_back(30);

    assert_eq!(v.len(), 3);
    assert_eq!(v[0], 10);
    assert_eq!(v[1], 20);
    assert_eq!(v[2], 30);
    assert_eq!(v.pop_back(), 30);
    assert_eq!(v.len(), 2);
}

#[test]
fn scope_end_destroys_in_reverse_insertion_order() {
    let factory = TrackedFactory::new();
    {
        let mut v = Vector::new();
        for i in 0..5 {
            v.push_back(factory.make(i));
        }
    }
    assert_eq!(factory.drop_order(), vec![4, 3, 2, 1, 0]);
    assert_eq!(factory.live(), 0);
}

#[test]
fn clear_destroys_in_reverse_insertion_order() {
    let factory = TrackedFactory::new();
    let mut v = Vector::new();
    for i in 0..4 {
        v.push_back(factory.make(i));
    }
    v.clear();
    assert_eq!(factory.drop_order(), vec![3, 2, 1, 0]);
    assert!(v.is_empty());
    assert!(v.capacity() > 0);
}

#[test]
fn copy_assignment_keeps_lhs_resource() {
    static A_COUNTS: Counters = Counters::new();
    static RES_A: MemoryResource = counting_resource(&A_COUNTS);
    static B_COUNTS: Counters = Counters::new();
    static RES_B: MemoryResource = counting_resource(&B_COUNTS);

    let mut lhs = Vector::filled(3, &0i32, Some(&RES_A));
    let mut rhs = Vector::with_resource(Some(&RES_B));
    for value in [10, 20, 30, 40, 50] {
        rhs.push_back(value);
    }

    let a_allocs = A_COUNTS.allocations();
    let a_deallocs = A_COUNTS.deallocations();
    let b_allocs = B_COUNTS.allocations();
    let b_deallocs = B_COUNTS.deallocations();

    lhs.clone_from(&rhs);

    assert_eq!(lhs.len(), 5);
    assert_eq!(lhs.as_slice(), &[10, 20, 30, 40, 50]);
    // the copy allocated once from A (the destination resource) and
    // released the destination's old block, also through A
    assert_eq!(A_COUNTS.allocations() - a_allocs, 1);
    assert_eq!(A_COUNTS.deallocations() - a_deallocs, 1);
    // the source resource saw no traffic at all
    assert_eq!(B_COUNTS.allocations() - b_allocs, 0);
    assert_eq!(B_COUNTS.deallocations() - b_deallocs, 0);
}

#[test]
fn strided_deletion() {
    let mut v = Vector::new();
    for i in 0..10 {
        v.push_back(i);
    }
    let removed = v.remove_all_where(|e| *e % 2 == 0);
    assert_eq!(removed, 5);
    assert_eq!(v.as_slice(), &[1, 3, 5, 7, 9]);
}

#[test]
fn retain_is_the_dual_of_remove_all() {
    let mut v = Vector::new();
    for i in 0..10 {
        v.push_back(i);
    }
    let removed = v.retain_all_where(|e| *e % 2 == 0);
    assert_eq!(removed, 5);
    assert_eq!(v.as_slice(), &[0, 2, 4, 6, 8]);
}

#[test]
fn reallocations_grow_logarithmically() {
    static COUNTS: Counters = Counters::new();
    static RES: MemoryResource = counting_resource(&COUNTS);

    let mut v = Vector::with_resource(Some(&RES));
    const N: usize = 10_000;
    for i in 0..N {
        v.push_back(i as u64);
    }
    assert_eq!(v.len(), N);
    for i in (0..N).step_by(977) {
        assert_eq!(v[i], i as u64);
    }

    // doubling growth: ~log2(N * 8 / 64) reallocations, far below N
    let allocations = COUNTS.allocations();
    assert!(allocations >= 1);
    assert!(
        allocations <= 20,
        "expected O(log N) reallocations, got {allocations}"
    );
}

#[test]
fn ordered_removal_preserves_survivor_order() {
    let mut v = Vector::copy_of(&[0, 1, 2, 3, 4, 5], None);
    v.remove_at(2);
    assert_eq!(v.as_slice(), &[0, 1, 3, 4, 5]);
    assert_eq!(v.pop_at(1), 1);
    assert_eq!(v.as_slice(), &[0, 3, 4, 5]);
}

#[test]
fn unordered_removal_swaps_in_the_last_element() {
    let mut v = Vector::copy_of(&[0, 1, 2, 3, 4, 5], None);
    v.remove_at_unordered(1);
    assert_eq!(v.as_slice(), &[0, 5, 2, 3, 4]);
    // removing the last element needs no swap
    v.remove_at_unordered(4);
    assert_eq!(v.as_slice(), &[0, 5, 2, 3]);
    assert_eq!(v.pop_at_unordered(0), 0);
    assert_eq!(v.as_slice(), &[3, 5, 2]);
}

#[test]
fn range_removal_ordered_and_unordered() {
    let mut v = Vector::copy_of(&[0, 1, 2, 3, 4, 5, 6, 7], None);
    v.remove_at_range(2, 3);
    assert_eq!(v.as_slice(), &[0, 1, 5, 6, 7]);
    v.remove_from_to(0, 2);
    assert_eq!(v.as_slice(), &[5, 6, 7]);
}

#[test]
fn value_removal_variants() {
    let mut v = Vector::copy_of(&[1, 2, 1, 3, 1, 4], None);
    assert_eq!(v.remove_first_value(&1), Some(0));
    assert_eq!(v.as_slice(), &[2, 1, 3, 1, 4]);
    assert_eq!(v.remove_last_value(&1), Some(3));
    assert_eq!(v.as_slice(), &[2, 1, 3, 4]);
    assert_eq!(v.remove_all_value(&1), 1);
    assert_eq!(v.as_slice(), &[2, 3, 4]);
    assert_eq!(v.remove_first_value(&99), None);
}

#[test]
fn constructions_and_destructions_balance() {
    let factory = TrackedFactory::new();
    {
        let mut v = Vector::new();
        for i in 0..20 {
            v.push_back(factory.make(i));
        }
        for i in 0..5 {
            v.remove_at_unordered(i);
        }
        let popped = v.pop_back();
        assert_eq!(factory.live(), v.len() + 1); // +1 for `popped`
        drop(popped);
        v.remove_all_where(|e| e.value % 3 == 0);
        let mut w = Vector::new();
        while !v.is_empty() {
            w.push_back(v.pop_back());
        }
    }
    assert_eq!(factory.live(), 0);
    assert_eq!(factory.ctors(), factory.dtors());
}

#[test]
fn extract_and_adopt_is_the_identity_without_element_traffic() {
    let factory = TrackedFactory::new();
    let mut v = Vector::new();
    for i in 0..6 {
        v.push_back(factory.make(i));
    }

    let ctors_before = factory.ctors();
    let dtors_before = factory.dtors();
    let data_before = v.as_ptr();

    let allocation = v.extract_allocation();
    assert!(v.is_empty());
    let w = Vector::from_allocation(allocation);

    assert_eq!(w.len(), 6);
    assert_eq!(w.as_ptr(), data_before);
    let values: Vec<i32> = w.as_slice().iter().map(|t| t.value).collect();
    assert_eq!(values, vec![0, 1, 2, 3, 4, 5]);
    // the round trip moved the handle, never an element
    assert_eq!(factory.ctors(), ctors_before);
    assert_eq!(factory.dtors(), dtors_before);
}

#[test]
fn copy_of_round_trips() {
    let source = vec![3u16, 1, 4, 1, 5, 9, 2, 6];
    let v = Vector::copy_of(&source, None);
    assert_eq!(v.as_slice(), source.as_slice());
}

#[test]
fn shrink_to_fit_is_idempotent() {
    static COUNTS: Counters = Counters::new();
    static RES: MemoryResource = counting_resource(&COUNTS);

    let mut v = Vector::with_capacity(1000, Some(&RES));
    for i in 0..10u32 {
        v.push_back(i);
    }
    v.shrink_to_fit();
    let after_first = COUNTS.allocations();
    v.shrink_to_fit();
    assert_eq!(COUNTS.allocations(), after_first);
    assert_eq!(v.as_slice(), &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
}

#[test]
fn pop_front_grows_front_capacity() {
    let mut v = Vector::copy_of(&[1, 2, 3, 4], None);
    assert_eq!(v.pop_front(), 1);
    assert_eq!(v.capacity_front(), 1);
    v.remove_front();
    assert_eq!(v.as_slice(), &[3, 4]);
    // the freed front slots are usable again without reallocation
    v.push_front_stable(9);
    assert_eq!(v.as_slice(), &[9, 3, 4]);
}

#[test]
fn reserve_front_allows_stable_prepends() {
    let mut v = Vector::copy_of(&[5, 6], None);
    v.reserve_front(2);
    let data_before = v.as_ptr();
    v.push_front_stable(4);
    v.push_front_stable(3);
    assert_eq!(v.as_slice(), &[3, 4, 5, 6]);
    // stable prepends must not have moved the storage
    assert_eq!(unsafe { v.as_ptr().add(2) }, data_before);
}

#[test]
fn reserve_back_exact_reserves_tightly() {
    static COUNTS: Counters = Counters::new();
    static RES: MemoryResource = counting_resource(&COUNTS);

    let mut v = Vector::<u8>::with_resource(Some(&RES));
    v.reserve_back_exact(100);
    assert!(v.has_capacity_back_for(100));
    // exact reserve rounds only to the cache line, not the doubling curve
    assert!(v.capacity() <= 128);
}

#[test]
fn fill_overwrites_every_element() {
    let mut v = Vector::copy_of(&[1, 2, 3], None);
    v.fill(&7);
    assert_eq!(v.as_slice(), &[7, 7, 7]);
}

#[test]
fn resize_to_filled_can_reference_an_element() {
    let mut v = Vector::copy_of(&[41, 42], None);
    // the template value is read out first; growth must not invalidate it
    let template = v[0];
    v.resize_to_filled(5, &template);
    assert_eq!(v.as_slice(), &[41, 42, 41, 41, 41]);
}

#[test]
fn out_of_bounds_indexing_hits_the_contract_handler() {
    use std::panic::{catch_unwind, AssertUnwindSafe};

    let _guard = keel::ScopedAssertionHandler::new(|info: &keel::AssertionInfo| {
        panic!("contract: {}", info.message);
    });

    let v = Vector::copy_of(&[1, 2, 3], None);
    let result = catch_unwind(AssertUnwindSafe(|| v[3]));
    let err = result.unwrap_err();
    let text = err.downcast_ref::<String>().expect("panic payload");
    assert!(text.contains("index out of bounds"));
}

#[test]
fn clone_preserves_content_with_tracked_elements() {
    let factory = TrackedFactory::new();
    let mut v = Vector::new();
    for i in 0..4 {
        v.push_back(factory.make(i));
    }
    // Vector::clone requires T: Clone; Tracked's derive would bypass the
    // counters, so clone manually through the factory-aware helper
    let mut copy = Vector::new();
    for element in v.as_slice() {
        copy.push_back(element.cloned());
    }
    assert_eq!(copy.len(), v.len());
    drop(v);
    drop(copy);
    assert_eq!(factory.live(), 0);
}

proptest! {
    #[test]
    fn push_sequences_match_the_vec_model(values in proptest::collection::vec(any::<i32>(), 0..256)) {
        let mut v = Vector::new();
        let mut model = Vec::new();
        for &value in &values {
            v.push_back(value);
            model.push(value);
            prop_assert_eq!(v.len(), model.len());
            prop_assert_eq!(*v.last(), *model.last().unwrap());
        }
        prop_assert_eq!(v.as_slice(), model.as_slice());
    }

    #[test]
    fn predicate_removal_matches_the_retain_model(
        values in proptest::collection::vec(0i32..100, 0..128),
        threshold in 0i32..100,
    ) {
        let mut v = Vector::copy_of(&values, None);
        let removed = v.remove_all_where(|e| *e < threshold);

        let mut model = values.clone();
        model.retain(|e| *e >= threshold);

        prop_assert_eq!(removed, values.len() - model.len());
        prop_assert_eq!(v.as_slice(), model.as_slice());
    }

    #[test]
    fn unordered_removal_keeps_the_multiset(
        values in proptest::collection::vec(0u8..50, 1..64),
        seed in any::<u64>(),
    ) {
        let mut v = Vector::copy_of(&values, None);
        let mut expected: Vec<u8> = values.clone();

        let mut state = seed;
        while !v.is_empty() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let idx = (state >> 33) as usize % v.len();
            let value = v.pop_at_unordered(idx);
            let pos = expected.iter().position(|&e| e == value).unwrap();
            expected.swap_remove(pos);
        }
        prop_assert!(expected.is_empty());
    }
}
