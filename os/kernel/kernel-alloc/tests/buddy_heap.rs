use kernel_alloc::buddy::{BuddyHeap, HEADER_SIZE, HeapError, MIN_ORDER};

#[repr(C, align(4096))]
struct Page([u8; 4096]);

/// 64 KiB of page-aligned heap memory.
fn arena() -> Vec<Page> {
    (0..16).map(|_| Page([0; 4096])).collect()
}

fn heap(arena: &mut [Page]) -> BuddyHeap {
    let size = arena.len() * 4096;
    unsafe { BuddyHeap::new(arena.as_mut_ptr().cast(), size, 0) }.unwrap()
}

#[test]
fn freed_buddies_merge_back() {
    let mut memory = arena();
    let mut heap = heap(&mut memory);
    let min_payload = (1 << MIN_ORDER) - HEADER_SIZE;

    let a = heap.allocate(min_payload).unwrap();
    let b = heap.allocate(min_payload).unwrap();
    unsafe {
        assert!(heap.free(b.as_ptr()).is_applied());
        assert!(heap.free(a.as_ptr()).is_applied());
    }

    let merged = heap.allocate(2 * (1 << MIN_ORDER) - HEADER_SIZE).unwrap();
    assert_eq!(merged, a.min(b));
    assert_eq!(heap.stats().free_bytes, 64 * 1024 - 64);
}

#[test]
fn shrinking_realloc_does_not_move() {
    let mut memory = arena();
    let mut heap = heap(&mut memory);
    let p = heap.allocate(128).unwrap();
    let q = unsafe { heap.reallocate(p.as_ptr(), 64) }.unwrap();
    assert_eq!(q, Some(p));
}

#[test]
fn growing_realloc_preserves_prefix() {
    let mut memory = arena();
    let mut heap = heap(&mut memory);
    let p = heap.allocate(100).unwrap();
    let pattern: Vec<u8> = (0..100u8).map(|i| i.wrapping_mul(7)).collect();
    unsafe { p.as_ptr().copy_from_nonoverlapping(pattern.as_ptr(), pattern.len()) };

    let q = unsafe { heap.reallocate(p.as_ptr(), 5000) }.unwrap().unwrap();
    let moved = unsafe { core::slice::from_raw_parts(q.as_ptr(), pattern.len()) };
    assert_eq!(moved, pattern.as_slice());
    assert_eq!(heap.allocation_size(q.as_ptr()), Some(5000));
}

#[test]
fn exhaustion_is_reported_and_blocks_stay_usable() {
    let mut memory = arena();
    let mut heap = heap(&mut memory);

    let mut blocks = Vec::new();
    let err = loop {
        match heap.allocate(1000) {
            Ok(p) => {
                let tag = u32::try_from(blocks.len()).unwrap();
                unsafe { p.as_ptr().cast::<u32>().write(tag) };
                blocks.push(p);
            }
            Err(e) => break e,
        }
    };
    assert_eq!(err, HeapError::OutOfMemory);
    assert_eq!(blocks.len(), 64);

    for (i, p) in blocks.iter().enumerate() {
        let tag = unsafe { p.as_ptr().cast::<u32>().read() };
        assert_eq!(tag as usize, i);
        unsafe { p.as_ptr().cast::<u32>().write(!tag) };
    }
    for p in blocks {
        unsafe {
            assert!(heap.free(p.as_ptr()).is_applied());
        }
    }
    assert_eq!(heap.stats().free_blocks(16), 1);
}

#[test]
fn bad_frees_never_corrupt_the_heap() {
    let mut memory = arena();
    let mut heap = heap(&mut memory);
    let p = heap.allocate(300).unwrap();
    let q = heap.allocate(300).unwrap();

    unsafe {
        assert!(heap.free(p.as_ptr()).is_applied());
        assert!(heap.free(p.as_ptr()).is_skipped());
        assert!(heap.free(core::ptr::null_mut()).is_skipped());
        assert!(heap.free(heap.start().wrapping_add(64 * 1024 + 8)).is_skipped());
    }
    assert_eq!(heap.allocation_size(q.as_ptr()), Some(300));

    // The freed block is handed out again, exactly once.
    let r = heap.allocate(300).unwrap();
    assert_eq!(r, p);
    let s = heap.allocate(300).unwrap();
    assert_ne!(s, r);
    assert_ne!(s, q);
}
