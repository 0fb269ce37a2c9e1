//! # Virtual and Physical Memory Address Types (i386)
//!
//! Strongly typed wrappers for 32-bit protected-mode addresses and page bases.
//!
//! ## Overview
//!
//! All higher-level memory abstractions are built from a few principal types:
//!
//! | Concept | Generic | Description |
//! |----------|----------|-------------|
//! | [`MemoryAddress`] | – | A raw 32-bit address, either physical or virtual. |
//! | [`MemoryPage<S>`] | [`S: PageSize`](PageSize) | A page-aligned base address of a page of size `S`. |
//! | [`MemoryAddressOffset<S>`] | [`S: PageSize`](PageSize) | An offset within a page of size `S`. |
//!
//! These are then wrapped to distinguish between virtual and physical spaces:
//!
//! | Wrapper | Meaning |
//! |----------|----------|
//! | [`VirtualAddress`] / [`VirtualPage<S>`] | Refer to virtual (page-table translated) memory. |
//! | [`PhysicalAddress`] / [`PhysicalPage<S>`] | Refer to physical memory frames. |
//!
//! ## Page Sizes
//!
//! Pages are [`Size4K`]: 4 KiB, the unit mapped by one page-table entry.
//! One page-directory entry covers 1024 of them.
//!
//! ```text
//!  31            22 21            12 11                0
//! +----------------+----------------+-------------------+
//! |  dir index     |  table index   |   page offset     |
//! +----------------+----------------+-------------------+
//!  \_______ page number ___________/ \__ Size4K offset _/
//! ```
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0xC012_3456);
//! let (page, off) = va.split::<Size4K>();
//! assert_eq!(page.base().as_u32(), 0xC012_3000);
//! assert_eq!(off.as_u32(), 0x456);
//! assert_eq!(page.join(off), va);
//!
//! let pa = PhysicalAddress::new(0x0018_1042);
//! assert_eq!(pa.page::<Size4K>().frame_number(), 0x181);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod memory_address;
mod memory_address_offset;
mod memory_page;
mod page_size;
mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use memory_address::MemoryAddress;
pub use memory_address_offset::MemoryAddressOffset;
pub use memory_page::MemoryPage;
pub use page_size::{PageSize, Size4K};
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;
