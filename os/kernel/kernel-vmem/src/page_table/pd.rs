//! # i386 Page Directory
//!
//! The upper of the two paging levels:
//!
//! - [`DirIndex`]: index type for virtual-address bits `[31:22]`.
//! - [`PdEntry`]: a directory entry pointing at a [`PageTable`](super::pt::PageTable).
//! - [`PageDirectory`]: a 4 KiB-aligned array of 1024 directory entries.
//!
//! ## Invariants & Notes
//!
//! - The kernel never sets `PS` here; every present entry links a page table.
//! - [`PdEntry::make_next`] forces `present=1` and `PS=0`.
//! - The physical address of the directory is what CR3 holds.

use crate::PageEntryBits;
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};

/// Number of entries in a page directory.
pub const ENTRIES_PER_DIRECTORY: usize = 1024;

/// Index into the page directory (derived from VA bits `[31:22]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DirIndex(u16);

/// A single page-directory entry.
#[doc(alias = "PDE")]
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PdEntry(PageEntryBits);

/// The page directory: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PD")]
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [PdEntry; ENTRIES_PER_DIRECTORY],
}

impl DirIndex {
    /// Extract bits `[31:22]` of a virtual address.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from(va: VirtualAddress) -> Self {
        Self::new((va.as_u32() >> 22) as u16)
    }

    /// Construct from a raw `u16`.
    ///
    /// ### Debug assertions
    /// - Asserts `v < 1024` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!(v < 1024);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0 as u32
    }

    /// First virtual address covered by this directory slot.
    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress::new(self.as_u32() << 22)
    }
}

impl PdEntry {
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(PageEntryBits::new())
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0.present()
    }

    /// The underlying bitfield, frame included.
    #[inline]
    #[must_use]
    pub const fn flags(self) -> PageEntryBits {
        self.0
    }

    /// If present, the frame holding the linked page table.
    #[inline]
    #[must_use]
    pub const fn next_table(self) -> Option<PhysicalPage<Size4K>> {
        if !self.is_present() {
            return None;
        }
        debug_assert!(!self.0.large_page(), "4 MiB pages are not used");
        Some(self.0.physical_page())
    }

    /// Link the page table in `page`.
    #[inline]
    #[must_use]
    pub const fn make_next(page: PhysicalPage<Size4K>, mut flags: PageEntryBits) -> Self {
        flags.set_large_page(false);
        flags.set_present(true);
        flags.set_physical_address(page.base());
        Self(flags)
    }

    /// The same entry, additionally allowing user access.
    #[inline]
    #[must_use]
    pub const fn with_user_access(self) -> Self {
        Self(self.0.with_user_access(true))
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0.into_bits()
    }

    /// Construct from a raw 32-bit value without validation.
    #[inline]
    #[must_use]
    pub const fn from_raw(v: u32) -> Self {
        Self(PageEntryBits::from_bits(v))
    }
}

impl PageDirectory {
    /// A fully zeroed directory (all entries non-present).
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PdEntry::zero(); ENTRIES_PER_DIRECTORY],
        }
    }

    /// Reset every entry to non-present.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PdEntry::zero());
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: DirIndex) -> PdEntry {
        self.entries[i.as_usize()]
    }

    #[inline]
    pub const fn set(&mut self, i: DirIndex, e: PdEntry) {
        self.entries[i.as_usize()] = e;
    }

    #[inline]
    pub const fn set_zero(&mut self, i: DirIndex) {
        self.set(i, PdEntry::zero());
    }

    /// Present entries together with their index.
    pub fn present_entries(&self) -> impl Iterator<Item = (DirIndex, PdEntry)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_present())
            .map(|(i, e)| (DirIndex::new(index_u16(i)), *e))
    }

    #[inline]
    #[must_use]
    pub const fn index_of(va: VirtualAddress) -> DirIndex {
        DirIndex::from(va)
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn index_u16(i: usize) -> u16 {
    i as u16
}

#[cfg(test)]
mod test {
    use super::*;
    use kernel_memory_addresses::PhysicalAddress;

    #[test]
    fn pde_links_table() {
        let table = PhysicalPage::<Size4K>::from_addr(PhysicalAddress::new(0x0020_3000));
        let e = PdEntry::make_next(table, PageEntryBits::new().with_writable(true));
        assert_eq!(e.raw(), 0x0020_3003);
        assert_eq!(e.next_table(), Some(table));
        assert!(PdEntry::zero().next_table().is_none());
    }

    #[test]
    fn index_round_trips_through_base() {
        let i = DirIndex::from(VirtualAddress::new(0xF012_3456));
        assert_eq!(i.as_usize(), 0x3C0);
        assert_eq!(i.base(), VirtualAddress::new(0xF000_0000));
    }

    #[test]
    fn directory_is_one_frame() {
        assert_eq!(size_of::<PageDirectory>(), 4096);
        assert_eq!(align_of::<PageDirectory>(), 4096);
    }
}
