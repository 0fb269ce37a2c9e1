//! The real paging unit, driven through CR3, CR2 and `invlpg`.

use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};
use kernel_registers::cr2::Cr2;
use kernel_registers::cr3::Cr3;
use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe, tlb};
use kernel_vmem::Mmu;

/// [`Mmu`] backed by the CPU's control registers.
pub struct HardwareMmu {
    _private: (),
}

impl HardwareMmu {
    /// # Safety
    /// Must only be used at CPL0 with paging enabled.
    #[must_use]
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl Mmu for HardwareMmu {
    unsafe fn load_root(&self, root: PhysicalPage<Size4K>) {
        unsafe { Cr3::from_directory(root.base()).store_unsafe() }
    }

    fn active_root(&self) -> PhysicalPage<Size4K> {
        // SAFETY: constructing a `HardwareMmu` promised ring 0.
        let cr3 = unsafe { Cr3::load_unsafe() };
        PhysicalPage::from_addr(cr3.directory())
    }

    fn flush_page(&self, va: VirtualAddress) {
        // SAFETY: see `active_root`.
        unsafe { tlb::invlpg(va) }
    }
}

/// The linear address of the most recent page fault.
///
/// # Safety
/// Ring 0 only; meaningful inside the page-fault handler before anything
/// else can fault.
#[must_use]
pub unsafe fn fault_address() -> VirtualAddress {
    unsafe { Cr2::load_unsafe() }.fault_address()
}
