//! The region provider: the external collaborator that supplies the raw,
//! grow-only backing memory for the heap.
//!
//! The allocation engine only ever calls [`RegionProvider::extend`] to grow
//! the break and [`RegionProvider::heap_low`]/[`RegionProvider::heap_high`]
//! to query the current bounds; it never implements a region provider
//! itself. [`StaticRegion`] is the one concrete provider this crate ships,
//! so that `Allocator<N>` is usable without any external system
//! dependency.

use core::mem::MaybeUninit;
use core::ptr;

/// Supplies the contiguous, grow-only memory region the heap is built on.
///
/// Implementations assume single-threaded, non-reentrant use: the engine
/// never calls a `RegionProvider` method recursively or concurrently with
/// another call.
pub trait RegionProvider {
    /// Grow the break by `bytes` and return a pointer to the start of the
    /// newly-available region (the old break), or a null pointer if the
    /// region cannot grow by that much.
    fn extend(&mut self, bytes: usize) -> *mut u8;

    /// The lowest currently-valid address in the region.
    fn heap_low(&self) -> *mut u8;

    /// The highest currently-valid address in the region (inclusive).
    fn heap_high(&self) -> *mut u8;
}

/// A region provider backed by a fixed-size, 16-byte-aligned buffer.
///
/// The break only ever moves forward, starting at the buffer's base and
/// refusing to extend past `N` bytes total.
#[repr(align(16))]
pub struct StaticRegion<const N: usize> {
    storage: [MaybeUninit<u8>; N],
    brk: usize,
}

impl<const N: usize> StaticRegion<N> {
    /// Create a new, empty region. Nothing has been handed out yet; the
    /// break sits at offset 0.
    pub const fn new() -> Self {
        Self {
            storage: [MaybeUninit::uninit(); N],
            brk: 0,
        }
    }
}

impl<const N: usize> Default for StaticRegion<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RegionProvider for StaticRegion<N> {
    fn extend(&mut self, bytes: usize) -> *mut u8 {
        let Some(new_brk) = self.brk.checked_add(bytes) else {
            return ptr::null_mut();
        };
        if new_brk > N {
            return ptr::null_mut();
        }
        // SAFETY: `self.brk` is in bounds (it only ever holds a value that
        // was previously accepted here, starting from 0), so this is a
        // pointer to (or one-past) an element of `storage`.
        let old_brk = unsafe { self.storage.as_mut_ptr().add(self.brk) }.cast::<u8>();
        self.brk = new_brk;
        old_brk
    }

    fn heap_low(&self) -> *mut u8 {
        self.storage.as_ptr() as *mut u8
    }

    fn heap_high(&self) -> *mut u8 {
        // SAFETY: `self.brk` is always <= N, and when it is 0 this points
        // one-before the buffer, which is never dereferenced (callers only
        // compare against it once the heap is non-empty).
        unsafe { self.storage.as_ptr().add(self.brk).sub(1) as *mut u8 }
    }
}
