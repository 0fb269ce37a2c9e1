//! # Physmap-based `PhysMapper`
//!
//! Once the VMM has built the kernel address space, every physical frame is
//! visible at a fixed offset:
//!
//! ```text
//!   virtual = PHYSMAP_BASE + physical      for physical < PHYSMAP_LIMIT
//! ```
//!
//! [`PhysmapMapper`] turns that rule into a [`PhysMapper`] so page tables,
//! the frame bitmap and copied page contents can be touched by physical address.
//!
//! ## Example
//! ```rust
//! use kernel_alloc::phys_mapper::PhysmapMapper;
//! use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
//!
//! let va = PhysmapMapper::phys_to_virt(PhysicalAddress::new(0x0012_3000)).unwrap();
//! assert_eq!(va, VirtualAddress::new(0xC012_3000));
//! assert_eq!(PhysmapMapper::virt_to_phys(va), Some(PhysicalAddress::new(0x0012_3000)));
//! assert_eq!(PhysmapMapper::virt_to_phys(VirtualAddress::new(0x1000)), None);
//! ```

use kernel_info::memory::{PHYSMAP_BASE, PHYSMAP_LIMIT};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::PhysMapper;

/// [`PhysMapper`] for the kernel's physical memory window at [`PHYSMAP_BASE`].
///
/// # Safety
/// Only usable after the physmap has been installed, and only for physical
/// addresses below [`PHYSMAP_LIMIT`] that are backed by installed memory.
#[derive(Debug, Copy, Clone, Default)]
pub struct PhysmapMapper;

impl PhysmapMapper {
    /// Virtual alias of `pa` in the physmap, if the window reaches it.
    #[inline]
    #[must_use]
    pub const fn phys_to_virt(pa: PhysicalAddress) -> Option<VirtualAddress> {
        if pa.as_u32() >= PHYSMAP_LIMIT {
            return None;
        }
        Some(VirtualAddress::new(PHYSMAP_BASE + pa.as_u32()))
    }

    /// Physical address behind a physmap alias, if `va` lies in the window.
    #[inline]
    #[must_use]
    pub const fn virt_to_phys(va: VirtualAddress) -> Option<PhysicalAddress> {
        let v = va.as_u32();
        if v < PHYSMAP_BASE || v - PHYSMAP_BASE >= PHYSMAP_LIMIT {
            return None;
        }
        Some(PhysicalAddress::new(v - PHYSMAP_BASE))
    }
}

impl PhysMapper for PhysmapMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        debug_assert!(pa.as_u32() < PHYSMAP_LIMIT, "{pa} is outside the physmap");
        let va = (PHYSMAP_BASE as usize + pa.as_usize()) as *mut T;
        // SAFETY: the caller guarantees `pa` is installed memory holding a `T`.
        unsafe { &mut *va }
    }
}
