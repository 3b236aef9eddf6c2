use std::alloc::{GlobalAlloc, Layout};

#[test]
fn is_usable_in_const_contexts() {
    const _ALLOCATOR1: segfit::Allocator<4096> = segfit::Allocator::new();
    static _ALLOCATOR2: segfit::Allocator<4096> = segfit::Allocator::new();
}

#[test]
fn supports_global_alloc() {
    fn assert<T: core::alloc::GlobalAlloc>(_: T) {}
    assert(segfit::Allocator::<4096>::new())
}

#[test]
fn heap_too_small_for_even_the_first_extend_returns_null_rather_than_panicking() {
    let allocator = segfit::Allocator::<4>::new();
    let layout = Layout::new::<u64>();
    // SAFETY: `layout` is a well-formed, non-zero-sized layout.
    let ptr = unsafe { allocator.alloc(layout) };
    assert!(ptr.is_null());
}

#[test]
fn an_alignment_finer_than_the_allocator_guarantees_is_rejected() {
    let allocator = segfit::Allocator::<4096>::new();
    let layout = Layout::from_size_align(64, 32).unwrap();
    // SAFETY: `layout` is well-formed; rejecting an over-aligned request is
    // exactly what's under test.
    let ptr = unsafe { allocator.alloc(layout) };
    assert!(ptr.is_null());
}

#[test]
fn check_heap_reports_ok_after_normal_use() {
    let allocator = segfit::Allocator::<4096>::new();
    let layout = Layout::new::<[u8; 64]>();
    // SAFETY: `layout` is well-formed and freed exactly once, with the
    // layout it was allocated with.
    unsafe {
        let ptr = allocator.alloc(layout);
        assert!(!ptr.is_null());
        allocator.dealloc(ptr, layout);
    }
    assert!(allocator.check_heap().is_ok());
}
