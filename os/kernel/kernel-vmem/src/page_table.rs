//! # Memory Page Table

pub mod pd;
pub mod pt;

use crate::page_table::pd::DirIndex;
use crate::page_table::pt::TableIndex;
use core::ops::Range;
use kernel_memory_addresses::{PageSize, Size4K, VirtualAddress, VirtualPage};

/// Number of 4 KiB pages in the 32-bit address space.
pub const PAGES_IN_ADDRESS_SPACE: u64 = 1 << 20;

#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (DirIndex, TableIndex) {
    (DirIndex::from(va), TableIndex::from(va))
}

/// Page numbers touched by `[va, va + size)`.
///
/// The start is rounded down and the end rounded up to page boundaries.
/// Ranges running past 4 GiB are clipped to the end of the address space.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn page_span(va: VirtualAddress, size: u32) -> Range<u32> {
    let first = u64::from(va.as_u32()) >> Size4K::SHIFT;
    let end = u64::from(va.as_u32()) + u64::from(size);
    let last = end.div_ceil(u64::from(Size4K::SIZE)).min(PAGES_IN_ADDRESS_SPACE);
    (first as u32)..(last as u32)
}

/// Iterate the pages touched by `[va, va + size)`.
pub fn pages_in(va: VirtualAddress, size: u32) -> impl Iterator<Item = VirtualPage<Size4K>> {
    page_span(va, size).map(VirtualPage::from_page_number)
}
