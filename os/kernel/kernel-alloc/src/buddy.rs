//! # Buddy Heap
//!
//! A power-of-two buddy allocator over one contiguous, already mapped region.
//!
//! ```text
//!  base                                                   base + 2^max_order
//!   ├──────────────────────────┬──────────────┬─────┬─────┤
//!   │        order n-1         │   order n-2  │ n-3 │ n-3 │
//!   └──────────────────────────┴──────────────┴─────┴─────┘
//!                 buddies differ in exactly one offset bit ──┘
//! ```
//!
//! ## Blocks
//!
//! Every block has a size of `2^order` bytes, `MIN_ORDER <= order <= max_order`,
//! and starts at an offset from `base` that is a multiple of its size. The
//! buddy of the block at `offset` is the block at `offset ^ 2^order`.
//!
//! An allocated block starts with an 8-byte [`AllocHeader`] holding the
//! requested size and a magic sentinel; the caller receives the address right
//! behind it. A free block instead holds a [`FreeNode`] linking it into the
//! free list of its order. Links are offsets from `base`, not pointers.
//!
//! ## Invariants
//! - A free block is in exactly one free list, the one of its order.
//! - The magic of a live allocation is [`MAGIC`]; it is cleared on free, which
//!   makes a second free of the same pointer a detectable no-op.
//! - The order of a live block is always the order needed for its recorded
//!   size plus header.

use core::ptr::NonNull;
use kernel_vmem::Outcome;
use log::{debug, trace, warn};

/// Smallest block order (32 bytes).
pub const MIN_ORDER: u32 = 5;

/// Orders must stay strictly below this.
pub const ORDER_LIMIT: u32 = 32;

/// Sentinel marking a live allocation.
pub const MAGIC: u32 = 0xFEED_BEEF;

/// Bytes in front of every allocation.
pub const HEADER_SIZE: usize = size_of::<AllocHeader>();

/// Granularity of the heap region's start and end.
pub const REGION_ALIGN: usize = 4096;

const ORDER_SLOTS: usize = (ORDER_LIMIT - MIN_ORDER) as usize;
const NIL: usize = usize::MAX;

/// Header at the base of an allocated block.
#[repr(C)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AllocHeader {
    /// Requested payload size, header excluded.
    pub size: u32,
    pub magic: u32,
}

/// Free-list node at the base of a free block.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
struct FreeNode {
    prev: usize,
    next: usize,
}

/// Hard failures of heap setup and allocation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum HeapError {
    #[error("heap region starts at null")]
    NullStart,
    #[error("heap region is smaller than one minimum-order block")]
    RegionTooSmall,
    #[error("heap region order {0} is not below {ORDER_LIMIT}")]
    OrderOutOfRange(u32),
    #[error("zero-sized allocation")]
    ZeroSize,
    #[error("allocation of {0} bytes exceeds the heap maximum")]
    TooLarge(usize),
    #[error("no free block large enough")]
    OutOfMemory,
    #[error("pointer is not a live allocation of this heap")]
    InvalidPointer,
}

/// Why a [`BuddyHeap::free`] did nothing.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HeapFreeRejection {
    NullPointer,
    /// The header would lie outside the managed region.
    OutOfRange,
    /// The header is not at a block boundary.
    Misaligned,
    /// Not a live allocation: never allocated, already freed or corrupted.
    BadMagic,
    /// The recorded size does not fit any order of this heap.
    CorruptSize,
}

/// Where a heap lives and how much of it the buddy scheme manages.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HeapLayout {
    /// Page-aligned start address.
    pub start: usize,
    /// `2^max_order`, the largest power of two fitting the aligned region.
    pub managed_size: usize,
    pub max_order: u32,
}

impl HeapLayout {
    /// Fit a buddy heap into `[start, start + size)`.
    ///
    /// The start is rounded up and the end rounded down to [`REGION_ALIGN`].
    ///
    /// # Errors
    /// - [`HeapError::NullStart`] if `start` is zero.
    /// - [`HeapError::RegionTooSmall`] if less than one minimum block remains.
    /// - [`HeapError::OrderOutOfRange`] if the region needs an order of [`ORDER_LIMIT`] or more.
    pub const fn compute(start: usize, size: usize) -> Result<Self, HeapError> {
        if start == 0 {
            return Err(HeapError::NullStart);
        }
        let Some(aligned_start) = start.checked_next_multiple_of(REGION_ALIGN) else {
            return Err(HeapError::RegionTooSmall);
        };
        let end = start.saturating_add(size) / REGION_ALIGN * REGION_ALIGN;
        if end <= aligned_start {
            return Err(HeapError::RegionTooSmall);
        }
        let usable = end - aligned_start;
        let order = usize::BITS - 1 - usable.leading_zeros();
        if order < MIN_ORDER {
            return Err(HeapError::RegionTooSmall);
        }
        if order >= ORDER_LIMIT {
            return Err(HeapError::OrderOutOfRange(order));
        }
        Ok(Self {
            start: aligned_start,
            managed_size: 1 << order,
            max_order: order,
        })
    }

    #[inline]
    #[must_use]
    pub const fn end(&self) -> usize {
        self.start + self.managed_size
    }
}

/// Free-space summary of a [`BuddyHeap`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HeapStats {
    pub free_bytes: usize,
    free_blocks: [usize; ORDER_SLOTS],
}

impl HeapStats {
    /// Number of free blocks of the given order.
    #[must_use]
    pub const fn free_blocks(&self, order: u32) -> usize {
        if order < MIN_ORDER || order >= ORDER_LIMIT {
            return 0;
        }
        self.free_blocks[(order - MIN_ORDER) as usize]
    }
}

/// A buddy allocator over a single region.
pub struct BuddyHeap {
    base: NonNull<u8>,
    managed_size: usize,
    max_order: u32,
    max_size: usize,
    heads: [usize; ORDER_SLOTS],
}

// SAFETY: the heap exclusively owns its region; moving it between contexts
// moves that ownership along.
unsafe impl Send for BuddyHeap {}

impl BuddyHeap {
    /// Manage the region `[start, start + size)`.
    ///
    /// `max_size` caps a single allocation including its header; zero or
    /// anything above the managed size means the managed size.
    ///
    /// # Errors
    /// See [`HeapLayout::compute`].
    ///
    /// # Safety
    /// The whole region must be mapped, writable and used by nothing else for
    /// as long as the heap (or any pointer it handed out) lives.
    pub unsafe fn new(start: *mut u8, size: usize, max_size: usize) -> Result<Self, HeapError> {
        let layout = HeapLayout::compute(start.addr(), size)?;
        let base = start.wrapping_add(layout.start - start.addr());
        unsafe { Self::with_layout(base, layout, max_size) }
    }

    /// Manage a region whose [`HeapLayout`] was computed up front.
    ///
    /// # Errors
    /// [`HeapError::NullStart`] if `base` is null.
    ///
    /// # Safety
    /// `base` must point at `layout.start`, and `[layout.start, layout.end())`
    /// must satisfy the requirements of [`new`](Self::new).
    pub unsafe fn with_layout(
        base: *mut u8,
        layout: HeapLayout,
        max_size: usize,
    ) -> Result<Self, HeapError> {
        let base = NonNull::new(base).ok_or(HeapError::NullStart)?;
        debug_assert_eq!(base.as_ptr().addr(), layout.start);

        let max_size = if max_size == 0 || max_size > layout.managed_size {
            layout.managed_size
        } else {
            max_size
        };
        let mut heap = Self {
            base,
            managed_size: layout.managed_size,
            max_order: layout.max_order,
            max_size,
            heads: [NIL; ORDER_SLOTS],
        };
        heap.push(0, heap.max_order);
        debug!(
            "buddy heap at {:#x}: {} bytes, orders {MIN_ORDER}..={}, max allocation {max_size}",
            layout.start, layout.managed_size, layout.max_order
        );
        Ok(heap)
    }

    #[inline]
    #[must_use]
    pub fn start(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    #[inline]
    #[must_use]
    pub const fn managed_size(&self) -> usize {
        self.managed_size
    }

    #[inline]
    #[must_use]
    pub const fn max_order(&self) -> u32 {
        self.max_order
    }

    /// Largest allocation, header included.
    #[inline]
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    /// `true` if `ptr` points into the managed region.
    #[must_use]
    pub fn contains(&self, ptr: *const u8) -> bool {
        ptr.addr()
            .checked_sub(self.base.as_ptr().addr())
            .is_some_and(|off| off < self.managed_size)
    }

    /// Allocate `size` bytes.
    ///
    /// The returned pointer is 8-byte aligned.
    ///
    /// # Errors
    /// - [`HeapError::ZeroSize`] for `size == 0`.
    /// - [`HeapError::TooLarge`] if `size` plus header exceeds the heap maximum.
    /// - [`HeapError::OutOfMemory`] if no block of a sufficient order is free.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        if size == 0 {
            debug!("zero-sized allocation requested");
            return Err(HeapError::ZeroSize);
        }
        let total = size.saturating_add(HEADER_SIZE);
        let recorded = u32::try_from(size).map_err(|_| HeapError::TooLarge(size))?;
        if total > self.max_size {
            debug!("allocation of {total} bytes exceeds the maximum of {}", self.max_size);
            return Err(HeapError::TooLarge(size));
        }
        let target = order_for(total as u64);
        if target > self.max_order {
            return Err(HeapError::TooLarge(size));
        }

        let Some(found) = (target..=self.max_order).find(|&o| self.head(o) != NIL) else {
            debug!("no free block of order {target} or above");
            return Err(HeapError::OutOfMemory);
        };
        let offset = self.pop(found).ok_or(HeapError::OutOfMemory)?;

        let mut order = found;
        while order > target {
            order -= 1;
            self.push(offset + (1 << order), order);
        }

        self.write_header(
            offset,
            AllocHeader {
                size: recorded,
                magic: MAGIC,
            },
        );
        Ok(self.payload(offset))
    }

    /// Release an allocation.
    ///
    /// Anything that is not a live allocation of this heap is ignored, and
    /// the reason is reported.
    ///
    /// # Safety
    /// If `ptr` is a live allocation of this heap, nothing may use it afterwards.
    pub unsafe fn free(&mut self, ptr: *mut u8) -> Outcome<HeapFreeRejection> {
        let (offset, order) = match self.live_block(ptr) {
            Ok(block) => block,
            Err(HeapFreeRejection::NullPointer) => {
                trace!("free of null ignored");
                return Outcome::Skipped(HeapFreeRejection::NullPointer);
            }
            Err(reason) => {
                warn!("free of {ptr:p} ignored: {reason:?}");
                return Outcome::Skipped(reason);
            }
        };

        self.write_header(offset, AllocHeader { size: 0, magic: 0 });
        self.release(offset, order);
        Outcome::Applied
    }

    /// Resize an allocation.
    ///
    /// - A null `ptr` allocates `new_size` bytes.
    /// - A `new_size` of zero frees `ptr` and yields `None`.
    /// - If `new_size` fits the current block, the pointer stays the same and
    ///   no data moves. Unneeded upper halves of the block are released, so
    ///   the capacity shrinks with it: growing back to the old size moves.
    /// - Otherwise the content moves to a new block and the old one is freed.
    ///
    /// # Errors
    /// - [`HeapError::InvalidPointer`] if `ptr` is not a live allocation.
    /// - Any error of [`allocate`](Self::allocate); the original block is kept.
    ///
    /// # Safety
    /// As for [`free`](Self::free): after a move or a free, the old pointer is dead.
    pub unsafe fn reallocate(
        &mut self,
        ptr: *mut u8,
        new_size: usize,
    ) -> Result<Option<NonNull<u8>>, HeapError> {
        if ptr.is_null() {
            if new_size == 0 {
                return Ok(None);
            }
            return self.allocate(new_size).map(Some);
        }
        if new_size == 0 {
            // Rejections are already logged by `free`.
            let _ = unsafe { self.free(ptr) };
            return Ok(None);
        }

        let Ok((offset, order)) = self.live_block(ptr) else {
            warn!("reallocate of {ptr:p}: not a live allocation");
            return Err(HeapError::InvalidPointer);
        };
        let header = self.read_header(offset);
        let capacity = (1usize << order) - HEADER_SIZE;

        if new_size <= capacity {
            let recorded = u32::try_from(new_size).map_err(|_| HeapError::TooLarge(new_size))?;
            let new_order = order_for((new_size + HEADER_SIZE) as u64);
            let mut upper = order;
            while upper > new_order {
                upper -= 1;
                self.push(offset + (1 << upper), upper);
            }
            self.write_header(
                offset,
                AllocHeader {
                    size: recorded,
                    magic: MAGIC,
                },
            );
            return Ok(NonNull::new(ptr));
        }

        let moved = self.allocate(new_size)?;
        let keep = (header.size as usize).min(new_size);
        // SAFETY: both blocks are live, distinct and hold at least `keep` bytes.
        unsafe { core::ptr::copy_nonoverlapping(ptr.cast_const(), moved.as_ptr(), keep) };
        let _ = unsafe { self.free(ptr) };
        Ok(Some(moved))
    }

    /// The recorded size of a live allocation.
    #[must_use]
    pub fn allocation_size(&self, ptr: *const u8) -> Option<usize> {
        let (offset, _) = self.live_block(ptr).ok()?;
        Some(self.read_header(offset).size as usize)
    }

    /// Free space per order.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            free_bytes: 0,
            free_blocks: [0; ORDER_SLOTS],
        };
        for order in MIN_ORDER..=self.max_order {
            let mut cursor = self.head(order);
            while cursor != NIL {
                stats.free_blocks[slot(order)] += 1;
                stats.free_bytes += 1 << order;
                cursor = self.read_node(cursor).next;
            }
        }
        stats
    }

    /// Validate `ptr` as a live allocation; yields its block offset and order.
    fn live_block(&self, ptr: *const u8) -> Result<(usize, u32), HeapFreeRejection> {
        if ptr.is_null() {
            return Err(HeapFreeRejection::NullPointer);
        }
        let offset = ptr
            .addr()
            .checked_sub(self.base.as_ptr().addr())
            .and_then(|o| o.checked_sub(HEADER_SIZE))
            .ok_or(HeapFreeRejection::OutOfRange)?;
        if offset + HEADER_SIZE > self.managed_size {
            return Err(HeapFreeRejection::OutOfRange);
        }
        if !offset.is_multiple_of(1 << MIN_ORDER) {
            return Err(HeapFreeRejection::Misaligned);
        }

        let header = self.read_header(offset);
        if header.magic != MAGIC {
            return Err(HeapFreeRejection::BadMagic);
        }
        let order = order_for(u64::from(header.size) + HEADER_SIZE as u64);
        if order > self.max_order {
            return Err(HeapFreeRejection::CorruptSize);
        }
        if !offset.is_multiple_of(1 << order) {
            return Err(HeapFreeRejection::Misaligned);
        }
        Ok((offset, order))
    }

    /// Return a block to the free lists, merging with free buddies.
    fn release(&mut self, mut offset: usize, mut order: u32) {
        while order < self.max_order {
            let buddy = buddy_of(offset, order);
            if buddy + (1 << order) > self.managed_size || !self.is_free(buddy, order) {
                break;
            }
            self.unlink(buddy, order);
            offset = offset.min(buddy);
            order += 1;
        }
        self.push(offset, order);
    }

    #[inline]
    const fn head(&self, order: u32) -> usize {
        self.heads[slot(order)]
    }

    fn is_free(&self, offset: usize, order: u32) -> bool {
        let mut cursor = self.head(order);
        while cursor != NIL {
            if cursor == offset {
                return true;
            }
            cursor = self.read_node(cursor).next;
        }
        false
    }

    fn push(&mut self, offset: usize, order: u32) {
        let head = self.head(order);
        self.write_node(offset, FreeNode { prev: NIL, next: head });
        if head != NIL {
            let mut next = self.read_node(head);
            next.prev = offset;
            self.write_node(head, next);
        }
        self.heads[slot(order)] = offset;
    }

    fn pop(&mut self, order: u32) -> Option<usize> {
        let head = self.head(order);
        if head == NIL {
            return None;
        }
        self.unlink(head, order);
        Some(head)
    }

    fn unlink(&mut self, offset: usize, order: u32) {
        let node = self.read_node(offset);
        if node.prev == NIL {
            self.heads[slot(order)] = node.next;
        } else {
            let mut prev = self.read_node(node.prev);
            prev.next = node.next;
            self.write_node(node.prev, prev);
        }
        if node.next != NIL {
            let mut next = self.read_node(node.next);
            next.prev = node.prev;
            self.write_node(node.next, next);
        }
    }

    #[inline]
    fn payload(&self, offset: usize) -> NonNull<u8> {
        // SAFETY: `offset + HEADER_SIZE` stays inside the managed region.
        unsafe { self.base.add(offset + HEADER_SIZE) }
    }

    #[inline]
    #[allow(clippy::cast_ptr_alignment)]
    fn at<T>(&self, offset: usize) -> *mut T {
        debug_assert!(offset + size_of::<T>() <= self.managed_size);
        self.base.as_ptr().wrapping_add(offset).cast::<T>()
    }

    fn read_node(&self, offset: usize) -> FreeNode {
        // SAFETY: free blocks are aligned to at least 32 bytes and hold a node.
        unsafe { self.at::<FreeNode>(offset).read() }
    }

    fn write_node(&mut self, offset: usize, node: FreeNode) {
        // SAFETY: see `read_node`.
        unsafe { self.at::<FreeNode>(offset).write(node) }
    }

    fn read_header(&self, offset: usize) -> AllocHeader {
        // SAFETY: `offset` is 32-byte aligned and inside the region.
        unsafe { self.at::<AllocHeader>(offset).read() }
    }

    fn write_header(&mut self, offset: usize, header: AllocHeader) {
        // SAFETY: see `read_header`.
        unsafe { self.at::<AllocHeader>(offset).write(header) }
    }
}

/// Free-list slot of an order.
#[inline]
const fn slot(order: u32) -> usize {
    (order - MIN_ORDER) as usize
}

/// Smallest order whose block holds `total` bytes, at least [`MIN_ORDER`].
#[inline]
#[must_use]
pub const fn order_for(total: u64) -> u32 {
    let order = if total <= 1 {
        0
    } else {
        u64::BITS - (total - 1).leading_zeros()
    };
    if order < MIN_ORDER { MIN_ORDER } else { order }
}

/// Offset of the buddy of the block at `offset` with the given order.
#[inline]
#[must_use]
pub const fn buddy_of(offset: usize, order: u32) -> usize {
    offset ^ (1 << order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(4096))]
    struct Page([u8; 4096]);

    /// Page-aligned backing memory for a heap.
    struct Arena {
        pages: Vec<Page>,
    }

    impl Arena {
        fn new(pages: usize) -> Self {
            let mut v = Vec::with_capacity(pages);
            for _ in 0..pages {
                v.push(Page([0; 4096]));
            }
            Self { pages: v }
        }

        fn heap(&mut self, max_size: usize) -> BuddyHeap {
            let size = self.pages.len() * 4096;
            unsafe { BuddyHeap::new(self.pages.as_mut_ptr().cast(), size, max_size).unwrap() }
        }
    }

    #[test]
    fn order_for_rounds_up_to_power_of_two() {
        assert_eq!(order_for(1), MIN_ORDER);
        assert_eq!(order_for(32), 5);
        assert_eq!(order_for(33), 6);
        assert_eq!(order_for(64), 6);
        assert_eq!(order_for(4096 + 8), 13);
    }

    #[test]
    fn buddies_differ_in_one_bit() {
        assert_eq!(buddy_of(0, 5), 32);
        assert_eq!(buddy_of(32, 5), 0);
        assert_eq!(buddy_of(64, 6), 0);
        assert_eq!(buddy_of(0x300, 8), 0x200);
    }

    #[test]
    fn layout_takes_largest_power_of_two() {
        let layout = HeapLayout::compute(0x1000, 3 * 4096).unwrap();
        assert_eq!(layout.start, 0x1000);
        assert_eq!(layout.managed_size, 8192);
        assert_eq!(layout.max_order, 13);

        let layout = HeapLayout::compute(0x1800, 0x2000).unwrap();
        assert_eq!(layout.start, 0x2000);
        assert_eq!(layout.end(), 0x3000);
    }

    #[test]
    fn layout_rejects_bad_regions() {
        assert_eq!(HeapLayout::compute(0, 0x1000), Err(HeapError::NullStart));
        assert_eq!(HeapLayout::compute(0x1000, 0x800), Err(HeapError::RegionTooSmall));
        assert_eq!(HeapLayout::compute(0x1800, 0x1000), Err(HeapError::RegionTooSmall));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn layout_rejects_order_32() {
        assert_eq!(
            HeapLayout::compute(0x1000, 1 << 32),
            Err(HeapError::OrderOutOfRange(32))
        );
    }

    #[test]
    fn fresh_heap_is_one_block() {
        let mut arena = Arena::new(4);
        let heap = arena.heap(0);
        let stats = heap.stats();
        assert_eq!(stats.free_bytes, 16384);
        assert_eq!(stats.free_blocks(14), 1);
        assert_eq!(heap.max_size(), 16384);
    }

    #[test]
    fn max_size_is_clamped_to_managed_size() {
        let mut arena = Arena::new(1);
        assert_eq!(arena.heap(1 << 20).max_size(), 4096);
        let mut arena = Arena::new(1);
        assert_eq!(arena.heap(256).max_size(), 256);
    }

    #[test]
    fn allocation_splits_down_to_target_order() {
        let mut arena = Arena::new(1);
        let mut heap = arena.heap(0);
        let p = heap.allocate(20).unwrap();
        assert_eq!(p.as_ptr(), heap.start().wrapping_add(HEADER_SIZE));
        assert_eq!(heap.allocation_size(p.as_ptr()), Some(20));

        let stats = heap.stats();
        for order in 5..12 {
            assert_eq!(stats.free_blocks(order), 1, "order {order}");
        }
        assert_eq!(stats.free_bytes, 4096 - 32);
    }

    #[test]
    fn header_is_written_in_front_of_payload() {
        let mut arena = Arena::new(1);
        let mut heap = arena.heap(0);
        let p = heap.allocate(100).unwrap();
        let header = unsafe { p.as_ptr().sub(HEADER_SIZE).cast::<AllocHeader>().read() };
        assert_eq!(header, AllocHeader { size: 100, magic: MAGIC });
        assert!(p.as_ptr().addr().is_multiple_of(8));
    }

    #[test]
    fn split_and_merge_round_trip() {
        let mut arena = Arena::new(1);
        let mut heap = arena.heap(0);
        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(16).unwrap();
        assert_eq!(b.as_ptr().addr() - a.as_ptr().addr(), 32);

        unsafe {
            assert!(heap.free(a.as_ptr()).is_applied());
            assert!(heap.free(b.as_ptr()).is_applied());
        }
        assert_eq!(heap.stats().free_blocks(12), 1);

        let merged = heap.allocate(64 - HEADER_SIZE).unwrap();
        assert_eq!(merged, a);
    }

    #[test]
    fn rejects_zero_and_oversized_requests() {
        let mut arena = Arena::new(1);
        let mut heap = arena.heap(512);
        assert_eq!(heap.allocate(0), Err(HeapError::ZeroSize));
        assert_eq!(heap.allocate(505), Err(HeapError::TooLarge(505)));
        assert!(heap.allocate(504).is_ok());
    }

    #[test]
    fn exhaustion_keeps_prior_allocations_intact() {
        let mut arena = Arena::new(1);
        let mut heap = arena.heap(0);
        let mut blocks = Vec::new();
        loop {
            match heap.allocate(56) {
                Ok(p) => {
                    let idx = u8::try_from(blocks.len()).unwrap();
                    unsafe { p.as_ptr().write_bytes(idx, 56) };
                    blocks.push(p);
                }
                Err(e) => {
                    assert_eq!(e, HeapError::OutOfMemory);
                    break;
                }
            }
        }
        assert_eq!(blocks.len(), 4096 / 64);
        for (i, p) in blocks.iter().enumerate() {
            let bytes = unsafe { core::slice::from_raw_parts(p.as_ptr(), 56) };
            assert!(bytes.iter().all(|&b| usize::from(b) == i));
        }
    }

    #[test]
    fn double_free_is_ignored() {
        let mut arena = Arena::new(1);
        let mut heap = arena.heap(0);
        let p = heap.allocate(40).unwrap();
        unsafe {
            assert_eq!(heap.free(p.as_ptr()), Outcome::Applied);
            assert_eq!(
                heap.free(p.as_ptr()),
                Outcome::Skipped(HeapFreeRejection::BadMagic)
            );
        }
        let stats = heap.stats();
        assert_eq!(stats.free_bytes, 4096);
        assert_eq!(stats.free_blocks(12), 1);
    }

    #[test]
    fn foreign_pointers_are_ignored() {
        let mut arena = Arena::new(1);
        let mut heap = arena.heap(0);
        let p = heap.allocate(40).unwrap();
        let mut outside = [0u8; 64];
        unsafe {
            assert_eq!(
                heap.free(core::ptr::null_mut()),
                Outcome::Skipped(HeapFreeRejection::NullPointer)
            );
            assert_eq!(
                heap.free(outside.as_mut_ptr().wrapping_add(8)),
                Outcome::Skipped(HeapFreeRejection::OutOfRange)
            );
            assert_eq!(
                heap.free(p.as_ptr().wrapping_add(4)),
                Outcome::Skipped(HeapFreeRejection::Misaligned)
            );
            assert_eq!(
                heap.free(heap.start()),
                Outcome::Skipped(HeapFreeRejection::OutOfRange)
            );
        }
        assert_eq!(heap.allocation_size(p.as_ptr()), Some(40));
    }

    #[test]
    fn realloc_in_place_keeps_pointer() {
        let mut arena = Arena::new(1);
        let mut heap = arena.heap(0);
        let p = heap.allocate(128).unwrap();
        let q = unsafe { heap.reallocate(p.as_ptr(), 64) }.unwrap();
        assert_eq!(q, Some(p));
        assert_eq!(heap.allocation_size(p.as_ptr()), Some(64));

        // Growing within the same block stays put as well.
        let r = unsafe { heap.reallocate(p.as_ptr(), 100) }.unwrap();
        assert_eq!(r, Some(p));
    }

    #[test]
    fn realloc_shrink_releases_upper_halves() {
        let mut arena = Arena::new(1);
        let mut heap = arena.heap(0);
        let p = heap.allocate(1000).unwrap();
        let before = heap.stats().free_bytes;
        unsafe { heap.reallocate(p.as_ptr(), 20) }.unwrap();
        assert_eq!(heap.stats().free_bytes, before + 1024 - 32);

        // The released halves are gone from this block: growing back moves.
        let q = unsafe { heap.reallocate(p.as_ptr(), 1000) }.unwrap().unwrap();
        assert_ne!(q, p);
        assert_eq!(heap.allocation_size(p.as_ptr()), None);

        unsafe {
            assert!(heap.free(q.as_ptr()).is_applied());
        }
        assert_eq!(heap.stats().free_blocks(12), 1);
    }

    #[test]
    fn realloc_growth_preserves_data() {
        let mut arena = Arena::new(1);
        let mut heap = arena.heap(0);
        let p = heap.allocate(24).unwrap();
        let pattern: Vec<u8> = (0..24).collect();
        unsafe { p.as_ptr().copy_from_nonoverlapping(pattern.as_ptr(), 24) };

        let q = unsafe { heap.reallocate(p.as_ptr(), 200) }.unwrap().unwrap();
        assert_ne!(q, p);
        let moved = unsafe { core::slice::from_raw_parts(q.as_ptr(), 24) };
        assert_eq!(moved, pattern.as_slice());
        assert_eq!(heap.allocation_size(p.as_ptr()), None);
    }

    #[test]
    fn realloc_failure_keeps_original() {
        let mut arena = Arena::new(1);
        let mut heap = arena.heap(0);
        let p = heap.allocate(2000).unwrap();
        assert_eq!(
            unsafe { heap.reallocate(p.as_ptr(), 3000) },
            Err(HeapError::OutOfMemory)
        );
        assert_eq!(heap.allocation_size(p.as_ptr()), Some(2000));
    }

    #[test]
    fn realloc_null_and_zero() {
        let mut arena = Arena::new(1);
        let mut heap = arena.heap(0);
        let p = unsafe { heap.reallocate(core::ptr::null_mut(), 10) }
            .unwrap()
            .unwrap();
        assert_eq!(heap.allocation_size(p.as_ptr()), Some(10));
        assert_eq!(unsafe { heap.reallocate(p.as_ptr(), 0) }, Ok(None));
        assert_eq!(heap.stats().free_bytes, 4096);
        assert_eq!(unsafe { heap.reallocate(core::ptr::null_mut(), 0) }, Ok(None));
    }

    #[test]
    fn realloc_of_dead_pointer_fails() {
        let mut arena = Arena::new(1);
        let mut heap = arena.heap(0);
        let p = heap.allocate(10).unwrap();
        unsafe {
            let _ = heap.free(p.as_ptr());
            assert_eq!(
                heap.reallocate(p.as_ptr(), 20),
                Err(HeapError::InvalidPointer)
            );
        }
    }
}
