//! The allocation engine: find-fit, split, coalesce, heap-extend, and the
//! four public operations (`allocate`, `free`, `reallocate`,
//! `zeroed_allocate`) built on top of them.
//!
//! [`Heap<R>`] owns everything the algorithm needs — the region provider,
//! the first real block's header, and the free-list index — behind `&mut
//! self` methods. There is no global mutable state; a caller that wants a
//! `'static`, thread-shared allocator wraps one `Heap<R>` in a mutex (see
//! [`crate::Allocator`]).

use core::ptr;

use crate::block::{self, DSIZE, MIN_BLOCK, WORD};
use crate::checker::CheckReport;
use crate::freelist::FreeLists;
use crate::region::RegionProvider;

/// Minimum growth increment when extending the heap.
pub(crate) const CHUNKSIZE: usize = 512;
/// Best-of-sample scan window per bucket in [`Heap::find_fit`].
pub(crate) const SEARCH_LIMIT: usize = 10;

/// The block-manager core: a segregated-fit allocator over a single,
/// grow-only heap region.
pub struct Heap<R> {
    region: R,
    heap_start: *mut u64,
    free: FreeLists,
}

// SAFETY: `Heap` only contains raw pointers derived from `region`'s own
// memory and an embedded `R`; it carries no thread-affinity of its own. The
// `Allocator` facade is the one that actually shares a `Heap` across
// threads, and it does so behind a mutex, so only one thread ever touches
// these pointers at a time.
unsafe impl<R: Send> Send for Heap<R> {}

impl<R: RegionProvider> Heap<R> {
    /// Construct a heap over `region`, without yet initializing the
    /// prologue/epilogue or extending the break. Call [`Heap::ensure_init`]
    /// (or just call [`Heap::allocate`], which does so implicitly) before
    /// using it.
    pub const fn new(region: R) -> Self {
        Self {
            region,
            heap_start: ptr::null_mut(),
            free: FreeLists::new(),
        }
    }

    fn is_initialized(&self) -> bool {
        !self.heap_start.is_null()
    }

    /// Set up the prologue and epilogue sentinels and extend the heap by
    /// one `CHUNKSIZE` increment. Idempotent: a heap that is already
    /// initialized is left untouched.
    pub fn ensure_init(&mut self) -> bool {
        if self.is_initialized() {
            return true;
        }

        let base = self.region.extend(2 * WORD);
        if base.is_null() {
            log::debug!("segfit: out of memory initializing the heap");
            return false;
        }
        let base = base.cast::<u64>();
        // SAFETY: `extend` just handed us a fresh, writable 2-word region.
        unsafe {
            // Prologue: a zero-size sentinel, itself "allocated" so nothing
            // ever tries to coalesce into it.
            base.write(block::pack(0, true, true, false));
            // Epilogue placeholder; `extend_heap` below immediately writes
            // the real one after growing past it.
            base.add(1).write(block::pack(0, true, true, false));
        }
        self.heap_start = unsafe { base.add(1) };

        if self.extend_heap(CHUNKSIZE).is_null() {
            return false;
        }
        true
    }

    /// Grow the break by at least `requested` bytes (rounded up to a
    /// multiple of 16), fold the new region into one free block, and
    /// coalesce it with whatever was already at the end of the heap.
    ///
    /// Returns the header of the resulting free block, or a null pointer on
    /// out-of-memory.
    fn extend_heap(&mut self, requested: usize) -> *mut u64 {
        let size = block::round_up(requested, DSIZE);
        let base = self.region.extend(size);
        if base.is_null() {
            log::debug!("segfit: region provider refused to extend by {size} bytes");
            return ptr::null_mut();
        }
        // `region.extend` grants `size` fresh bytes starting at `base`, but
        // the new block reuses the one word already reserved for the old
        // epilogue, one word behind `base` — it does not start at `base`
        // itself.
        let block = unsafe { base.cast::<u64>().sub(1) };

        // `block` is the address of the heap's previous epilogue; read its
        // prev_alloc/prev_small bits before overwriting it, so the new free
        // block correctly remembers what precedes it.
        // SAFETY: this word was written either by `ensure_init` or by a
        // previous `extend_heap` call, so it is initialized.
        let inherited = unsafe { block::tag_of(block) };

        // SAFETY: `block` reuses the already-reserved old-epilogue word, and
        // `block+WORD..block+size` is the rest of the region `extend` just
        // granted, so the whole `block..block+size` range is writable. We
        // write the header/footer directly (not via `write_block`) because
        // the word at `block + size` is not yet a valid header — it becomes
        // the new epilogue in the very next step.
        unsafe {
            let word = block::pack(size, false, inherited.prev_alloc, inherited.prev_small);
            block.write(word);
            if size > MIN_BLOCK {
                block::footer_of(block, size).write(word);
            }
        }

        let epilogue = unsafe { block::next_block(block, size) };
        // SAFETY: `block + size` is the last word of the `size` bytes
        // `extend` just granted starting at `base` (`base == block + WORD`),
        // so it is in bounds and writable.
        unsafe { epilogue.write(block::pack(0, true, false, size == MIN_BLOCK)) };

        log::trace!("segfit: extended heap by {size} bytes");
        self.coalesce(block)
    }

    /// Merge a freshly-free block with any free implicit-list neighbors,
    /// inserting the (possibly merged) result into the free index. Returns
    /// the header of the final block.
    fn coalesce(&mut self, b: *mut u64) -> *mut u64 {
        let b_tag = unsafe { block::tag_of(b) };
        let prev_alloc = b == self.heap_start || b_tag.prev_alloc;
        let prev_small = b != self.heap_start && b_tag.prev_small;

        let next = unsafe { block::next_block(b, b_tag.size) };
        let next_tag = unsafe { block::tag_of(next) };

        match (prev_alloc, next_tag.alloc) {
            (true, true) => {
                unsafe { self.free.insert(b, b_tag.size) };
                b
            }
            (true, false) => {
                unsafe { self.free.remove(next, next_tag.size) };
                let merged = b_tag.size + next_tag.size;
                unsafe { block::write_block(b, merged, false, prev_alloc, prev_small) };
                unsafe { self.free.insert(b, merged) };
                b
            }
            (false, true) => {
                let p = unsafe { self.predecessor(b, prev_small) };
                let p_tag = unsafe { block::tag_of(p) };
                unsafe { self.free.remove(p, p_tag.size) };
                let merged = p_tag.size + b_tag.size;
                unsafe {
                    block::write_block(p, merged, false, p_tag.prev_alloc, p_tag.prev_small)
                };
                unsafe { self.free.insert(p, merged) };
                p
            }
            (false, false) => {
                let p = unsafe { self.predecessor(b, prev_small) };
                let p_tag = unsafe { block::tag_of(p) };
                unsafe { self.free.remove(p, p_tag.size) };
                unsafe { self.free.remove(next, next_tag.size) };
                let merged = p_tag.size + b_tag.size + next_tag.size;
                unsafe {
                    block::write_block(p, merged, false, p_tag.prev_alloc, p_tag.prev_small)
                };
                unsafe { self.free.insert(p, merged) };
                p
            }
        }
    }

    /// # Safety
    /// `b` must not be `self.heap_start`, and `prev_small` must already be
    /// known to reflect `b`'s own header bit.
    unsafe fn predecessor(&self, b: *mut u64, prev_small: bool) -> *mut u64 {
        if prev_small {
            unsafe { block::prev_mini_block(b) }
        } else {
            unsafe { block::prev_block(b) }
        }
    }

    /// `round_up(requested + 8, 16)`, floored to `MIN_BLOCK`. Zero-sized
    /// requests are the caller's responsibility to reject before calling.
    fn adjust_size(requested: usize) -> usize {
        block::round_up(requested + WORD, DSIZE).max(MIN_BLOCK)
    }

    /// Bounded best-of-sample search: starting at `asize`'s bucket, scan up
    /// to [`SEARCH_LIMIT`] nodes per bucket, returning the smallest
    /// sufficiently-large block found in the first bucket that has one.
    fn find_fit(&self, asize: usize) -> Option<(*mut u64, usize)> {
        // Ordinary buckets only ever hold blocks of size >= 32; a 16-byte
        // request that missed the mini-list fast path still has to start
        // its search at the smallest ordinary bucket.
        let start = crate::freelist::bucket_of(asize.max(32));
        for i in start..crate::freelist::BUCKET_COUNT {
            let mut node = self.free.bucket_head(i);
            let mut best: Option<(*mut u64, usize)> = None;
            let mut scanned = 0;
            while !node.is_null() && scanned < SEARCH_LIMIT {
                let size = unsafe { block::size_of(node) };
                let better = match best {
                    Some((_, best_size)) => size < best_size,
                    None => true,
                };
                if size >= asize && better {
                    best = Some((node, size));
                }
                node = unsafe { FreeLists::bucket_next(node) };
                scanned += 1;
            }
            if best.is_some() {
                return best;
            }
        }
        None
    }

    /// Place a request of `asize` bytes into the free block `b` of size
    /// `b_size`, splitting off a free remainder when there is room for one.
    /// `b` must already have been removed from the free index.
    fn place(&mut self, b: *mut u64, b_size: usize, asize: usize) {
        let tag = unsafe { block::tag_of(b) };
        if b_size - asize >= MIN_BLOCK {
            unsafe { block::write_block(b, asize, true, tag.prev_alloc, tag.prev_small) };
            let remainder = unsafe { block::next_block(b, asize) };
            let remainder_size = b_size - asize;
            unsafe {
                block::write_block(remainder, remainder_size, false, true, asize == MIN_BLOCK)
            };
            unsafe { self.free.insert(remainder, remainder_size) };
        } else {
            unsafe { block::write_block(b, b_size, true, tag.prev_alloc, tag.prev_small) };
        }
    }

    /// Allocate `size` bytes, returning a 16-byte-aligned payload pointer,
    /// or a null pointer for a zero-sized request or out-of-memory. A
    /// zero-sized request returns without touching the heap at all — it
    /// does not even trigger lazy initialization.
    pub fn allocate(&mut self, size: usize) -> *mut u8 {
        debug_assert!(
            self.check_heap(line!()).is_ok(),
            "segfit: heap inconsistent on entry to allocate"
        );

        if size == 0 {
            return ptr::null_mut();
        }
        if !self.ensure_init() {
            return ptr::null_mut();
        }

        let asize = Self::adjust_size(size);

        if asize == MIN_BLOCK {
            let mini = unsafe { self.free.pop_mini() };
            if !mini.is_null() {
                let tag = unsafe { block::tag_of(mini) };
                unsafe {
                    block::write_block(mini, MIN_BLOCK, true, tag.prev_alloc, tag.prev_small)
                };
                let payload = block::payload_of(mini);
                debug_assert!(
                    self.check_heap(line!()).is_ok(),
                    "segfit: heap inconsistent on exit from allocate"
                );
                return payload;
            }
        }

        let (block_hdr, block_size) = match self.find_fit(asize) {
            Some((b, s)) => {
                unsafe { self.free.remove(b, s) };
                (b, s)
            }
            None => {
                let extend_amount = asize.max(CHUNKSIZE);
                let b = self.extend_heap(extend_amount);
                if b.is_null() {
                    return ptr::null_mut();
                }
                let s = unsafe { block::size_of(b) };
                unsafe { self.free.remove(b, s) };
                (b, s)
            }
        };

        self.place(block_hdr, block_size, asize);
        let payload = block::payload_of(block_hdr);
        debug_assert!(
            self.check_heap(line!()).is_ok(),
            "segfit: heap inconsistent on exit from allocate"
        );
        payload
    }

    /// Free a payload previously returned by [`Heap::allocate`] (or
    /// [`Heap::reallocate`]/[`Heap::zeroed_allocate`]). A null pointer is a
    /// no-op.
    pub fn free(&mut self, payload: *mut u8) {
        debug_assert!(
            self.check_heap(line!()).is_ok(),
            "segfit: heap inconsistent on entry to free"
        );

        if payload.is_null() {
            return;
        }
        let b = unsafe { block::header_of(payload) };
        debug_assert!(
            self.looks_like_a_live_block(b),
            "segfit: free() called with a pointer this heap never allocated"
        );
        let tag = unsafe { block::tag_of(b) };
        debug_assert!(tag.alloc, "segfit: double free detected");
        unsafe { block::write_block(b, tag.size, false, tag.prev_alloc, tag.prev_small) };
        self.coalesce(b);

        debug_assert!(
            self.check_heap(line!()).is_ok(),
            "segfit: heap inconsistent on exit from free"
        );
    }

    /// Resize the allocation at `payload` to `size` bytes, preserving the
    /// shared prefix of the old and new contents. See module docs for the
    /// `size == 0`/`payload.is_null()` edge cases.
    pub fn reallocate(&mut self, payload: *mut u8, size: usize) -> *mut u8 {
        debug_assert!(
            self.check_heap(line!()).is_ok(),
            "segfit: heap inconsistent on entry to reallocate"
        );

        if size == 0 {
            self.free(payload);
            return ptr::null_mut();
        }
        if payload.is_null() {
            return self.allocate(size);
        }

        let old_header = unsafe { block::header_of(payload) };
        let old_payload_size = unsafe { block::size_of(old_header) } - WORD;

        let new_payload = self.allocate(size);
        if new_payload.is_null() {
            return ptr::null_mut();
        }

        let copy_len = old_payload_size.min(size);
        // SAFETY: both regions are live, non-overlapping (a fresh
        // allocation never aliases a still-live one) byte buffers of at
        // least `copy_len` bytes.
        unsafe { ptr::copy_nonoverlapping(payload, new_payload, copy_len) };

        self.free(payload);
        debug_assert!(
            self.check_heap(line!()).is_ok(),
            "segfit: heap inconsistent on exit from reallocate"
        );
        new_payload
    }

    /// Allocate `elements * size` zeroed bytes. Returns a null pointer on
    /// multiplication overflow or out-of-memory.
    pub fn zeroed_allocate(&mut self, elements: usize, size: usize) -> *mut u8 {
        debug_assert!(
            self.check_heap(line!()).is_ok(),
            "segfit: heap inconsistent on entry to zeroed_allocate"
        );

        let Some(total) = elements.checked_mul(size) else {
            log::debug!("segfit: zeroed_allocate overflowed {elements} * {size}");
            return ptr::null_mut();
        };
        let payload = self.allocate(total);
        if !payload.is_null() {
            // SAFETY: `allocate` just returned a live, writable buffer of
            // at least `total` bytes.
            unsafe { ptr::write_bytes(payload, 0, total) };
        }

        debug_assert!(
            self.check_heap(line!()).is_ok(),
            "segfit: heap inconsistent on exit from zeroed_allocate"
        );
        payload
    }

    /// Best-effort check that `header` looks like a block this heap could
    /// have handed out: non-null and within the backing region. Used only
    /// to give `free`'s double-free/invalid-free debug assertions a more
    /// descriptive failure than a wild pointer dereference; it is not a
    /// soundness guarantee.
    fn looks_like_a_live_block(&self, header: *mut u64) -> bool {
        if header.is_null() || !self.is_initialized() {
            return false;
        }
        let (low, high) = self.region_bounds();
        let addr = header as usize;
        addr >= low as usize && addr <= high as usize
    }

    /// Run the heap checker. `line` identifies the call site (pass
    /// [`line!()`]) for diagnostics when a check fails.
    ///
    /// See [`crate::checker`] for what each check covers.
    pub fn check_heap(&self, line: u32) -> CheckReport {
        crate::checker::check(self, line)
    }

    pub(crate) fn heap_start(&self) -> *mut u64 {
        self.heap_start
    }

    pub(crate) fn free_lists(&self) -> &FreeLists {
        &self.free
    }

    pub(crate) fn region_bounds(&self) -> (*mut u8, *mut u8) {
        (self.region.heap_low(), self.region.heap_high())
    }

    /// Iterate the implicit list of real blocks, stopping before the
    /// epilogue.
    pub(crate) fn blocks(&self) -> ImplicitListIter {
        ImplicitListIter {
            next: self.heap_start,
        }
    }
}

/// Iterator over the implicit list of real (non-sentinel) blocks.
pub(crate) struct ImplicitListIter {
    next: *mut u64,
}

impl Iterator for ImplicitListIter {
    type Item = *mut u64;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next.is_null() {
            return None;
        }
        let size = unsafe { block::size_of(self.next) };
        if size == 0 {
            return None;
        }
        let current = self.next;
        self.next = unsafe { block::next_block(current, size) };
        Some(current)
    }
}
