//! The heap consistency checker: nine independent invariant checks over the
//! implicit list and the free-list index.
//!
//! Each check is a pure observer — it never mutates the heap — and each
//! reports its own pass/fail outcome rather than collapsing into a single
//! boolean, so a caller can see exactly which invariant broke (the
//! reference implementation this crate generalizes from left most of these
//! checks permanently disabled for lack of exactly this kind of
//! granularity).

use core::fmt;

use crate::block::{self, DSIZE, MIN_BLOCK};
use crate::freelist::{self, FreeLists, BUCKET_COUNT};
use crate::heap::Heap;
use crate::region::RegionProvider;

/// The outcome of running all nine checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckReport {
    /// Invariant 1: every block's size is a positive multiple of 16.
    pub sizes_well_formed: bool,
    /// Invariant 2: every payload address is 16-byte aligned.
    pub alignment: bool,
    /// Invariant 3: header == footer for every free, non-mini block.
    pub boundary_tags: bool,
    /// Invariant 4: no two adjacent implicit-list blocks are both free.
    pub coalesced: bool,
    /// Invariant 5: every block's prev_alloc/prev_small bits match its
    /// implicit-list predecessor.
    pub neighbor_bits: bool,
    /// Invariant 6: free blocks and free-list entries form equal
    /// multisets.
    pub free_list_membership: bool,
    /// Invariant 7: doubly-linked bucket nodes round-trip `next`/`prev`.
    pub list_integrity: bool,
    /// Invariant 8: every free-list pointer lies within the heap.
    pub pointer_bounds: bool,
    /// Invariant 9: every bucket's members fall within its declared size
    /// range.
    pub bucket_ranges: bool,
}

impl CheckReport {
    /// `true` iff every one of the nine checks passed.
    pub fn is_ok(&self) -> bool {
        self.sizes_well_formed
            && self.alignment
            && self.boundary_tags
            && self.coalesced
            && self.neighbor_bits
            && self.free_list_membership
            && self.list_integrity
            && self.pointer_bounds
            && self.bucket_ranges
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return write!(f, "heap ok");
        }
        write!(f, "heap check failed:")?;
        let checks: [(&str, bool); 9] = [
            ("sizes_well_formed", self.sizes_well_formed),
            ("alignment", self.alignment),
            ("boundary_tags", self.boundary_tags),
            ("coalesced", self.coalesced),
            ("neighbor_bits", self.neighbor_bits),
            ("free_list_membership", self.free_list_membership),
            ("list_integrity", self.list_integrity),
            ("pointer_bounds", self.pointer_bounds),
            ("bucket_ranges", self.bucket_ranges),
        ];
        for (name, passed) in checks {
            if !passed {
                write!(f, " {name}")?;
            }
        }
        Ok(())
    }
}

/// Run all nine checks against `heap` and return the combined report.
/// `line` identifies the call site, for the diagnostic logged on failure.
pub(crate) fn check<R: RegionProvider>(heap: &Heap<R>, line: u32) -> CheckReport {
    let report = CheckReport {
        sizes_well_formed: check_sizes(heap),
        alignment: check_alignment(heap),
        boundary_tags: check_boundary_tags(heap),
        coalesced: check_coalesced(heap),
        neighbor_bits: check_neighbor_bits(heap),
        free_list_membership: check_free_list_membership(heap),
        list_integrity: check_list_integrity(heap),
        pointer_bounds: check_pointer_bounds(heap),
        bucket_ranges: check_bucket_ranges(heap),
    };
    if !report.is_ok() {
        log::debug!("segfit: {report} (checked at line {line})");
    }
    report
}

fn check_sizes<R: RegionProvider>(heap: &Heap<R>) -> bool {
    heap.blocks()
        .all(|b| unsafe { block::size_of(b) } % DSIZE == 0 && unsafe { block::size_of(b) } > 0)
}

fn check_alignment<R: RegionProvider>(heap: &Heap<R>) -> bool {
    heap.blocks()
        .all(|b| block::payload_of(b) as usize % DSIZE == 0)
}

fn check_boundary_tags<R: RegionProvider>(heap: &Heap<R>) -> bool {
    heap.blocks().all(|b| {
        let tag = unsafe { block::tag_of(b) };
        if tag.alloc || tag.size <= MIN_BLOCK {
            return true;
        }
        let footer = unsafe { block::footer_of(b, tag.size) };
        unsafe { footer.read() == b.read() }
    })
}

fn check_coalesced<R: RegionProvider>(heap: &Heap<R>) -> bool {
    let mut prev_free: Option<bool> = None;
    for b in heap.blocks() {
        let alloc = unsafe { block::tag_of(b) }.alloc;
        if let Some(true) = prev_free {
            if !alloc {
                return false;
            }
        }
        prev_free = Some(!alloc);
    }
    true
}

fn check_neighbor_bits<R: RegionProvider>(heap: &Heap<R>) -> bool {
    let mut prev: Option<block::Tag> = None;
    for b in heap.blocks() {
        let tag = unsafe { block::tag_of(b) };
        if let Some(prev_tag) = prev {
            if tag.prev_alloc != prev_tag.alloc {
                return false;
            }
            if tag.prev_small != (prev_tag.size == MIN_BLOCK) {
                return false;
            }
        }
        prev = Some(tag);
    }
    true
}

fn check_free_list_membership<R: RegionProvider>(heap: &Heap<R>) -> bool {
    let implicit_free = heap
        .blocks()
        .filter(|&b| !unsafe { block::tag_of(b) }.alloc)
        .count();

    let lists = heap.free_lists();
    let mut listed_free = 0usize;
    let mut node = lists.mini_head();
    while !node.is_null() {
        if unsafe { block::tag_of(node) }.alloc {
            return false;
        }
        listed_free += 1;
        node = unsafe { FreeLists::mini_next(node) };
    }
    for i in 0..BUCKET_COUNT {
        let mut node = lists.bucket_head(i);
        while !node.is_null() {
            if unsafe { block::tag_of(node) }.alloc {
                return false;
            }
            listed_free += 1;
            node = unsafe { FreeLists::bucket_next(node) };
        }
    }

    implicit_free == listed_free
}

fn check_list_integrity<R: RegionProvider>(heap: &Heap<R>) -> bool {
    let lists = heap.free_lists();
    for i in 0..BUCKET_COUNT {
        let mut node = lists.bucket_head(i);
        let mut prev: *mut u64 = core::ptr::null_mut();
        while !node.is_null() {
            if unsafe { FreeLists::bucket_prev(node) } != prev {
                return false;
            }
            prev = node;
            node = unsafe { FreeLists::bucket_next(node) };
        }
    }
    true
}

fn check_pointer_bounds<R: RegionProvider>(heap: &Heap<R>) -> bool {
    let (low, high) = heap.region_bounds();
    let lo = low as usize;
    let hi = high as usize;
    let in_bounds = |p: *mut u64| {
        let addr = p as usize;
        addr >= lo && addr <= hi
    };

    let lists = heap.free_lists();
    let mut node = lists.mini_head();
    while !node.is_null() {
        if !in_bounds(node) {
            return false;
        }
        node = unsafe { FreeLists::mini_next(node) };
    }
    for i in 0..BUCKET_COUNT {
        let mut node = lists.bucket_head(i);
        while !node.is_null() {
            if !in_bounds(node) {
                return false;
            }
            node = unsafe { FreeLists::bucket_next(node) };
        }
    }
    true
}

fn check_bucket_ranges<R: RegionProvider>(heap: &Heap<R>) -> bool {
    let lists = heap.free_lists();
    for i in 0..BUCKET_COUNT {
        let (lo, hi) = freelist::bucket_range(i);
        let mut node = lists.bucket_head(i);
        while !node.is_null() {
            let size = unsafe { block::size_of(node) };
            if size < lo || size >= hi {
                return false;
            }
            node = unsafe { FreeLists::bucket_next(node) };
        }
    }
    true
}
