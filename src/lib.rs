//! A segregated free-list allocator for embedded systems.
//!
//! This crate provides a single type called [`Allocator`]. This type
//! implements the [`core::alloc::GlobalAlloc`]-trait, which is required to
//! use the [`alloc`-crate][alloc] on `#![no_std]`-targets. Internally it is
//! built from a few layers:
//!
//! - a one-word boundary-tag header/footer format every block is wrapped
//!   in.
//! - a segregated index of free blocks, bucketed by size class, that turns
//!   "find a free block" from a linear scan into a lookup.
//! - the [`Heap`] type: find-fit, split, coalesce and heap-extend built on
//!   top of the above, generic over where its backing memory comes from
//!   via [`RegionProvider`].
//! - an independent, read-only consistency checker over a live [`Heap`],
//!   exposed as [`Heap::check_heap`].
//!
//! # Usage
//! The usage is simple: just copy and paste the following code snippet into
//! your binary crate and adjust the number of bytes of the heap (here 16K):
//! ```no_run
//! #[global_allocator]
//! static ALLOCATOR: segfit::Allocator<16384> = segfit::Allocator::new();
//!
//! extern crate alloc;
//! ```
//! Afterwards you don't need to interact with the crate or the variable
//! `ALLOCATOR` anymore. Now you can just `use alloc::vec::Vec` or even
//! `use alloc::collections::BTreeMap`, i.e. every fancy collection which is
//! normally provided by `std`.
//!
//! # Implementation
//! Blocks are tagged with a one-word header packing their size and three
//! status bits (their own alloc bit, and their predecessor's alloc/size-class
//! bits, so neither neighbor ever needs to be touched just to check them).
//! Free blocks of 32 bytes or more additionally carry a matching footer, so
//! the block preceding any given block can be found in O(1); free blocks of
//! exactly 16 bytes ("mini" blocks) have no room for a footer and are kept on
//! their own singly-linked list instead.
//!
//! Ordinary free blocks are indexed into one of several size-class
//! buckets, each a doubly-linked list. Allocation does a bounded
//! best-of-sample search (scanning at most a handful of nodes per bucket)
//! starting at the smallest bucket that could hold the request, rather
//! than scanning the whole heap. Deallocation immediately coalesces with
//! both implicit-list neighbors before reinserting into the index, so free
//! space never fragments into more pieces than a single allocation/free
//! pair can create.
//!
//! When no bucket has a fit, the heap asks its [`RegionProvider`] to extend
//! the break by a fixed increment (or the request size, if larger) and
//! folds the new memory into the implicit list before retrying. This crate
//! ships one concrete `RegionProvider`, [`StaticRegion`], which hands out a
//! fixed-size static buffer; [`Allocator<N>`] is built on it.
//!
//! [alloc]: https://doc.rust-lang.org/alloc/index.html
#![no_std]

pub(crate) mod block;
pub(crate) mod checker;
pub(crate) mod freelist;
pub(crate) mod heap;
pub(crate) mod region;

pub use checker::CheckReport;
pub use heap::Heap;
pub use region::{RegionProvider, StaticRegion};

use core::alloc::{GlobalAlloc, Layout};

use spin::mutex::SpinMutex;

/// The widest alignment this allocator can satisfy. Every payload it hands
/// out is 16-byte aligned (see [`block`]); a request for anything coarser
/// is rejected.
const MAX_ALIGN: usize = 16;

/// The memory allocator for embedded systems.
///
/// This is the core type of this crate: a [`GlobalAlloc`] built over a
/// [`Heap`] of statically-sized backing memory, with a predefined upper
/// bound on its own heap memory usage. Because the heap lives in a `static`
/// buffer, it is counted to the binary's static memory (e.g.
/// `.data`/`.bss`-sections), which helps prevent surprises from an
/// unbounded heap growing into the stack. A stack/heap collision can still
/// happen if the stack itself grows into the static buffer, but the heap
/// can never grow past it.
///
/// Its usage is simple: just copy and paste the following into the binary
/// crate you're developing. The memory size of the heap is `16384` or 16K
/// in this example; adjust that value to your needs.
/// ```no_run
/// #[global_allocator]
/// static ALLOCATOR: segfit::Allocator<16384> = segfit::Allocator::new();
/// ```
/// The [`Heap`] this type wraps is not itself thread-safe or reentrant; the
/// `Allocator` facade serializes access through a [`spin::Mutex`] purely to
/// satisfy `GlobalAlloc`'s `Sync` bound, not to provide any real
/// concurrency — allocation under contention simply spins.
pub struct Allocator<const N: usize>(SpinMutex<Heap<StaticRegion<N>>>);

impl<const N: usize> Allocator<N> {
    /// Create a new [`Allocator`] with an empty, not-yet-extended heap.
    ///
    /// This function is a `const fn`, so it can be used directly to
    /// initialize a `static`.
    #[must_use = "assign the allocator to a static variable and apply the `#[global_allocator]`-attribute to make it the global allocator"]
    pub const fn new() -> Self {
        Self(SpinMutex::new(Heap::new(StaticRegion::new())))
    }

    /// Run the [heap checker](crate::checker) against the current state of
    /// this allocator's heap.
    pub fn check_heap(&self) -> CheckReport {
        self.0.lock().check_heap(line!())
    }
}

impl<const N: usize> Default for Allocator<N> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<const N: usize> GlobalAlloc for Allocator<N> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > MAX_ALIGN {
            log::debug!(
                "segfit: refusing an allocation with alignment {} > {MAX_ALIGN}",
                layout.align()
            );
            return core::ptr::null_mut();
        }
        self.0.lock().allocate(layout.size())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.0.lock().free(ptr);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > MAX_ALIGN {
            return core::ptr::null_mut();
        }
        self.0.lock().reallocate(ptr, new_size)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > MAX_ALIGN {
            return core::ptr::null_mut();
        }
        self.0.lock().zeroed_allocate(1, layout.size())
    }
}
