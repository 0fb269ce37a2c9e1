//! # Virtual Memory Support
//!
//! Two-level i386 paging structures and an editor for a single address space.
//!
//! ## What you get
//! - An [`address space`](address_space) wrapping one page directory.
//! - The [`PageEntryBits`] bitfield shared by directory and table entries.
//! - 4 KiB-aligned [`PageDirectory`]/[`PageTable`] wrappers and index helpers.
//! - A tiny allocator/mapper/MMU interface ([`FrameAlloc`], [`PhysMapper`], [`Mmu`]).
//! - The [`Outcome`] status used for operations with a benign no-op path.
//!
//! ## i386 Virtual Address → Physical Address Walk
//!
//! Each 32-bit virtual address is divided into three fields:
//!
//! ```text
//! | 31‒22 | 21‒12 | 11‒0   |
//! |   PD  |   PT  | Offset |
//! ```
//!
//! ```text
//!  CR3 ─► PD ──► PT ──► Physical Page
//!         │      │
//!         │      └───► PTE (Page Table Entry)     → maps 4 KiB page
//!         └──────────► PDE (Page Directory Entry) → points to a PT
//! ```
//!
//! | Level | Table name | Entry name | Description |
//! |:------|:-----------|:-----------|:------------|
//! | 1 | **PD** (Page Directory) | **PDE** | 1024 entries, each covering 4 MiB. One per address space, referenced by CR3. |
//! | 2 | **PT** (Page Table) | **PTE** | 1024 entries, each mapping a 4 KiB page. |
//!
//! A directory plus all its tables can map the full 4 GiB.
//!
//! ## Reaching tables
//!
//! Tables live in physical frames. Software edits them through a [`PhysMapper`],
//! which turns a physical address into a pointer in the current address space
//! (identity map in early boot, the physmap window afterwards).

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod address_space;
mod outcome;
mod page_entry_bits;
pub mod page_table;

#[cfg(test)]
mod test_support;

pub use crate::address_space::{AddressSpace, AlreadyPresent, Walk};
pub use crate::outcome::Outcome;
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::pd::{DirIndex, PageDirectory, PdEntry};
pub use crate::page_table::pt::{PageTable, PtEntry, TableIndex};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use log::error;

/// Hard failures of address-space edits.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum AddressSpaceError {
    /// No physical frame was available for a table or a page.
    #[error("out of physical frames")]
    OutOfMemory,
    /// A physical or virtual address that must be page-aligned was not.
    #[error("address {0:#010x} is not page-aligned")]
    Unaligned(u32),
    /// The entry to operate on is not present.
    #[error("address {0} is not mapped")]
    NotMapped(VirtualAddress),
}

/// Source of physical 4 KiB frames.
///
/// The implementation decides where frames come from (bitmap, test pool).
/// Returned frames **must** be 4 KiB aligned.
pub trait FrameAlloc {
    /// Allocate one 4 KiB frame, `None` on out-of-memory.
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>>;

    /// Return a frame obtained from [`alloc_4k`](Self::alloc_4k).
    ///
    /// Frames the allocator refuses to release are silently kept.
    fn free_4k(&mut self, page: PhysicalPage<Size4K>);
}

/// Converts physical addresses to *temporarily* usable pointers in the current
/// virtual address space (identity map or the physmap window).
///
/// # Safety
/// - You must ensure `pa` is mapped as writable in the current page tables
///   for `&mut T`.
/// - Lifetime `'a` is purely borrow-checked; the mapping must remain valid
///   for `'a`.
/// - Type `T` must match the bytes at `pa` (no aliasing UB).
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// See the trait documentation.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;
}

/// The paging unit of the CPU.
pub trait Mmu {
    /// Load `root` as the active page directory.
    ///
    /// # Safety
    /// `root` must be a complete directory that maps the running code,
    /// its stack and every structure reached afterwards.
    unsafe fn load_root(&self, root: PhysicalPage<Size4K>);

    /// The currently active page directory.
    fn active_root(&self) -> PhysicalPage<Size4K>;

    /// Drop the cached translation of the page containing `va`.
    fn flush_page(&self, va: VirtualAddress);
}

/// Back a single table slot with a fresh frame.
///
/// Already-present entries are left untouched.
///
/// # Errors
/// [`AddressSpaceError::OutOfMemory`] if no frame is available.
pub fn page_alloc<A: FrameAlloc>(
    entry: &mut PtEntry,
    alloc: &mut A,
    flags: PageEntryBits,
) -> Result<Outcome<AlreadyPresent>, AddressSpaceError> {
    if entry.is_present() {
        return Ok(Outcome::Skipped(AlreadyPresent));
    }
    let frame = alloc.alloc_4k().ok_or(AddressSpaceError::OutOfMemory)?;
    *entry = PtEntry::make_4k(frame, flags);
    Ok(Outcome::Applied)
}

/// Release the frame behind a single table slot and mark it absent.
///
/// # Errors
/// [`AddressSpaceError::NotMapped`] if the slot was not present; `va` only
/// serves to report which page that was.
pub fn page_free<A: FrameAlloc>(
    entry: &mut PtEntry,
    alloc: &mut A,
    va: VirtualAddress,
) -> Result<(), AddressSpaceError> {
    let Some((frame, _)) = entry.page_4k() else {
        error!("page_free: {va} is not present (entry {:#010x})", entry.raw());
        return Err(AddressSpaceError::NotMapped(va));
    };
    alloc.free_4k(frame);
    *entry = PtEntry::zero();
    Ok(())
}
