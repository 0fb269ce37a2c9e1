//! # Address Space (i386, directory-rooted)
//!
//! Strongly-typed helpers to build and manipulate a **single** virtual address
//! space, i.e. one [`PageDirectory`] and the [`PageTable`]s it links.
//!
//! ## Highlights
//!
//! - [`AddressSpace::create`] to allocate an empty directory.
//! - [`AddressSpace::map_page`] to install one 4 KiB mapping, creating the table on demand.
//! - [`AddressSpace::alloc_region`] / [`AddressSpace::free_region`] to back or release
//!   a virtual range with fresh frames.
//! - [`AddressSpace::clone_with_shared`] to duplicate an address space, sharing
//!   whatever tables it has in common with another one (the kernel's).
//! - [`AddressSpace::walk`] / [`AddressSpace::query`] to translate a VA.
//!
//! ## Design
//!
//! - Directory entries are always created present and writable. They gain
//!   `US` when a user-accessible leaf is placed below them, as the CPU
//!   checks permissions at both levels.
//! - Regions are widened to page boundaries: the start rounds down, the end rounds up.
//! - Keeps `unsafe` confined to mapping a physical frame to a typed table
//!   through the [`PhysMapper`].
//!
//! ## Safety
//!
//! - Mutating active mappings requires **TLB maintenance**; [`free_region`](AddressSpace::free_region)
//!   does it through the [`Mmu`], other editors leave it to the caller.
//! - The provided [`PhysMapper`] must yield **writable** references to table frames.

use crate::page_table::pd::{DirIndex, PageDirectory, PdEntry};
use crate::page_table::pt::{PageTable, PtEntry};
use crate::page_table::{page_span, pages_in, split_indices};
use crate::{AddressSpaceError, FrameAlloc, Mmu, Outcome, PageEntryBits, PhysMapper, page_alloc};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress, VirtualPage};
use log::{error, trace, warn};

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: PhysicalPage<Size4K>,
    mapper: &'m M,
}

/// The directory frame of an [`AddressSpace`].
pub type RootPage = PhysicalPage<Size4K>;

/// The slot to fill was already present; nothing was changed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AlreadyPresent;

/// Both levels of the translation of one virtual address.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Walk {
    pub va: VirtualAddress,
    pub pde: PdEntry,
    /// `None` when the directory entry is not present.
    pub pte: Option<PtEntry>,
}

impl Walk {
    /// The mapped frame, if both levels are present.
    #[must_use]
    pub fn frame(&self) -> Option<PhysicalPage<Size4K>> {
        self.pte.and_then(PtEntry::page_4k).map(|(page, _)| page)
    }
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Allocate a zeroed directory frame and wrap it.
    ///
    /// # Errors
    /// [`AddressSpaceError::OutOfMemory`] if no frame is available.
    pub fn create<A: FrameAlloc>(mapper: &'m M, alloc: &mut A) -> Result<Self, AddressSpaceError> {
        let root = alloc.alloc_4k().ok_or(AddressSpaceError::OutOfMemory)?;
        let space = Self { root, mapper };
        space.directory_mut().zero();
        Ok(space)
    }

    /// Wrap an existing directory frame.
    #[inline]
    pub const fn from_root(mapper: &'m M, root: RootPage) -> Self {
        Self { root, mapper }
    }

    /// Load this space's directory into the MMU.
    ///
    /// # Safety
    /// See [`Mmu::load_root`].
    #[inline]
    pub unsafe fn activate<U: Mmu>(&self, mmu: &U) {
        unsafe { mmu.load_root(self.root) }
    }

    /// Physical page of the directory.
    #[inline]
    pub const fn root_page(&self) -> RootPage {
        self.root
    }

    /// Borrow the [`PageDirectory`] as a typed table.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn directory_mut(&self) -> &mut PageDirectory {
        // SAFETY: `root` always holds a directory; the mapper yields writable views.
        unsafe { self.mapper.phys_to_mut(self.root.base()) }
    }

    /// Borrow the [`PageTable`] in this frame.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn table_mut(&self, page: PhysicalPage<Size4K>) -> &mut PageTable {
        // SAFETY: only called with frames linked from (or about to be linked into) a directory.
        unsafe { self.mapper.phys_to_mut(page.base()) }
    }

    #[inline]
    #[allow(clippy::mut_from_ref)]
    fn frame_bytes_mut(&self, page: PhysicalPage<Size4K>) -> &mut [u8; 4096] {
        // SAFETY: every frame is 4 KiB of plain bytes.
        unsafe { self.mapper.phys_to_mut(page.base()) }
    }

    /// Make sure a page table covers `va`, creating a zeroed one if needed.
    ///
    /// The new directory entry gets `flags`, forced present.
    ///
    /// # Errors
    /// [`AddressSpaceError::OutOfMemory`] if no frame is available for the table.
    pub fn create_page_table<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        flags: PageEntryBits,
    ) -> Result<Outcome<AlreadyPresent>, AddressSpaceError> {
        let dir = DirIndex::from(va);
        if self.directory_mut().get(dir).is_present() {
            return Ok(Outcome::Skipped(AlreadyPresent));
        }
        let table = alloc.alloc_4k().ok_or(AddressSpaceError::OutOfMemory)?;
        self.table_mut(table).zero();
        self.directory_mut()
            .set(dir, PdEntry::make_next(table, flags.flags_only()));
        trace!("page table for {} at {table}", dir.base());
        Ok(Outcome::Applied)
    }

    /// The table holding leaves of kind `leaf` in slot `dir`, created on demand.
    fn ensure_table<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        dir: DirIndex,
        leaf: PageEntryBits,
    ) -> Result<PhysicalPage<Size4K>, AddressSpaceError> {
        let link = PageEntryBits::table_link_for(leaf);
        // `create_page_table` only reports whether it had work to do.
        let _ = self.create_page_table(alloc, dir.base(), link)?;

        let directory = self.directory_mut();
        let mut pde = directory.get(dir);
        if leaf.user_access() && !pde.flags().user_access() {
            pde = pde.with_user_access();
            directory.set(dir, pde);
        }
        pde.next_table().ok_or(AddressSpaceError::NotMapped(dir.base()))
    }

    /// Map **one** 4 KiB page at `va → pa` with `flags`.
    ///
    /// Overwrites an existing mapping without releasing its frame.
    ///
    /// # Errors
    /// - [`AddressSpaceError::Unaligned`] if `va` or `pa` is not page-aligned.
    ///   An unaligned `pa` is refused rather than truncated to its frame, so
    ///   a stray offset never maps the wrong frame silently.
    /// - [`AddressSpaceError::OutOfMemory`] if the page table could not be created.
    pub fn map_page<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageEntryBits,
    ) -> Result<(), AddressSpaceError> {
        if !va.is_aligned::<Size4K>() {
            return Err(AddressSpaceError::Unaligned(va.as_u32()));
        }
        if !pa.is_aligned::<Size4K>() {
            return Err(AddressSpaceError::Unaligned(pa.as_u32()));
        }
        let (dir, slot) = split_indices(va);
        let table = self.ensure_table(alloc, dir, flags)?;
        self.table_mut(table)
            .set(slot, PtEntry::make_4k(PhysicalPage::from_addr(pa), flags));
        Ok(())
    }

    /// The table slot for `va`, if its page table exists.
    #[must_use]
    #[allow(clippy::mut_from_ref)]
    pub fn entry_mut(&self, va: VirtualAddress) -> Option<&mut PtEntry> {
        let (dir, slot) = split_indices(va);
        let table = self.directory_mut().get(dir).next_table()?;
        Some(self.table_mut(table).get_mut(slot))
    }

    /// Read both levels of the translation of `va`.
    #[must_use]
    pub fn walk(&self, va: VirtualAddress) -> Walk {
        let (dir, slot) = split_indices(va);
        let pde = self.directory_mut().get(dir);
        let pte = pde.next_table().map(|table| self.table_mut(table).get(slot));
        Walk { va, pde, pte }
    }

    /// The frame mapped at `va`, or `None` if either level is absent.
    #[must_use]
    pub fn get_phys_frame(&self, va: VirtualAddress) -> Option<PhysicalPage<Size4K>> {
        self.walk(va).frame()
    }

    /// Translate `va` to a physical address, in-page offset included.
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let frame = self.get_phys_frame(va)?;
        Some(frame.join(va.offset::<Size4K>()))
    }

    /// Back every page touched by `[va, va + size)` with a fresh frame.
    ///
    /// Pages that are already present are left alone. Returns the number of
    /// pages that were newly backed.
    ///
    /// # Errors
    /// [`AddressSpaceError::OutOfMemory`] when frames run out. Pages backed
    /// before the failure stay mapped; call [`free_region`](Self::free_region)
    /// over the same range to undo.
    pub fn alloc_region<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        size: u32,
        flags: PageEntryBits,
    ) -> Result<usize, AddressSpaceError> {
        let mut backed = 0;
        for page in pages_in(va, size) {
            let (dir, slot) = split_indices(page.base());
            let table = self.ensure_table(alloc, dir, flags)?;
            let entry = self.table_mut(table).get_mut(slot);
            if page_alloc(entry, alloc, flags)?.is_applied() {
                backed += 1;
            }
        }
        trace!("alloc_region {va}+{size:#x}: {backed} pages backed");
        Ok(backed)
    }

    /// Release every page touched by `[va, va + size)` and invalidate its TLB entry.
    ///
    /// Page tables in the covered directory slots that end up empty are
    /// released as well. Absent pages are skipped. Returns the number of pages
    /// released.
    ///
    /// Tables linked by `shared` (the kernel directory) are never released.
    /// In any other address space their slots are left alone entirely: the
    /// pages behind them belong to `shared`.
    pub fn free_region<A: FrameAlloc, U: Mmu>(
        &self,
        alloc: &mut A,
        mmu: &U,
        va: VirtualAddress,
        size: u32,
        shared: &AddressSpace<'_, M>,
    ) -> usize {
        let span = page_span(va, size);
        if span.is_empty() {
            return 0;
        }
        let owner = self.root == shared.root;

        let mut released = 0;
        let first_dir = span.start >> 10;
        let last_dir = (span.end - 1) >> 10;
        for dir_number in first_dir..=last_dir {
            #[allow(clippy::cast_possible_truncation)]
            let dir = DirIndex::new(dir_number as u16);
            let Some(table) = self.directory_mut().get(dir).next_table() else {
                continue;
            };
            let is_shared = shared.directory_mut().get(dir).next_table() == Some(table);
            if is_shared && !owner {
                warn!(
                    "free_region: table for {} belongs to {}, left alone",
                    dir.base(),
                    shared.root
                );
                continue;
            }

            let pages = span.start.max(dir_number << 10)..span.end.min((dir_number + 1) << 10);
            for number in pages {
                let page = VirtualPage::<Size4K>::from_page_number(number);
                let (_, slot) = split_indices(page.base());
                let entry = self.table_mut(table).get_mut(slot);
                if let Some((frame, _)) = entry.page_4k() {
                    alloc.free_4k(frame);
                    *entry = PtEntry::zero();
                    mmu.flush_page(page.base());
                    released += 1;
                }
            }

            if !is_shared && self.table_mut(table).is_empty() {
                trace!("releasing empty page table {table} for {}", dir.base());
                alloc.free_4k(table);
                self.directory_mut().set_zero(dir);
            }
        }
        released
    }

    /// Deep-copy the page table in `source`.
    ///
    /// Every present page gets a fresh frame holding a copy of the original
    /// content, mapped with identical flags.
    ///
    /// # Errors
    /// [`AddressSpaceError::OutOfMemory`]; frames taken so far are released first.
    pub fn clone_page_table<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        source: PhysicalPage<Size4K>,
    ) -> Result<PhysicalPage<Size4K>, AddressSpaceError> {
        let copy = alloc.alloc_4k().ok_or(AddressSpaceError::OutOfMemory)?;
        self.table_mut(copy).zero();

        for (slot, entry) in self.table_mut(source).present_entries() {
            let Some(frame) = alloc.alloc_4k() else {
                self.discard_table(alloc, copy);
                return Err(AddressSpaceError::OutOfMemory);
            };
            self.frame_bytes_mut(frame)
                .copy_from_slice(self.frame_bytes_mut(entry.frame()));
            self.table_mut(copy)
                .set(slot, PtEntry::make_4k(frame, entry.flags()));
        }
        Ok(copy)
    }

    /// Duplicate this address space.
    ///
    /// Directory slots that link the same table as `shared` are shared by
    /// reference; every other present table is deep-copied with
    /// [`clone_page_table`](Self::clone_page_table).
    ///
    /// # Errors
    /// [`AddressSpaceError::OutOfMemory`]; the partial copy is released first.
    pub fn clone_with_shared<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        shared: &AddressSpace<'_, M>,
    ) -> Result<Self, AddressSpaceError> {
        let clone = Self::create(self.mapper, alloc)?;

        for (dir, pde) in self.linked_tables() {
            if shared.directory_mut().get(dir).next_table() == pde.next_table() {
                clone.directory_mut().set(dir, pde);
                continue;
            }
            let Some(table) = pde.next_table() else {
                continue;
            };
            match self.clone_page_table(alloc, table) {
                Ok(copy) => clone
                    .directory_mut()
                    .set(dir, PdEntry::make_next(copy, pde.flags())),
                Err(e) => {
                    clone.destroy(alloc, shared);
                    return Err(e);
                }
            }
        }
        Ok(clone)
    }

    /// Release this address space: every table it does not share with
    /// `shared`, the pages those tables map, and finally the directory.
    ///
    /// Must not be called on the active address space.
    pub fn destroy<A: FrameAlloc>(self, alloc: &mut A, shared: &AddressSpace<'_, M>) {
        if self.root == shared.root {
            error!("refusing to destroy the shared directory {}", self.root);
            return;
        }
        for (dir, pde) in self.linked_tables() {
            let Some(table) = pde.next_table() else {
                continue;
            };
            if shared.directory_mut().get(dir).next_table() != Some(table) {
                self.discard_table(alloc, table);
            }
        }
        alloc.free_4k(self.root);
    }

    /// Present directory entries, read one at a time.
    ///
    /// Each step takes its own short borrow of the directory, so the caller may
    /// look at other directories (even this one) while iterating.
    fn linked_tables(&self) -> impl Iterator<Item = (DirIndex, PdEntry)> + '_ {
        (0..1024u16)
            .map(DirIndex::new)
            .map(|dir| (dir, self.directory_mut().get(dir)))
            .filter(|(_, pde)| pde.is_present())
    }

    /// Release a table and every frame it maps.
    fn discard_table<A: FrameAlloc>(&self, alloc: &mut A, table: PhysicalPage<Size4K>) {
        for (_, entry) in self.table_mut(table).present_entries() {
            alloc.free_4k(entry.frame());
        }
        alloc.free_4k(table);
    }
}
