//! # Page Faults
//!
//! There is no demand paging: every page fault is reported and the CPU halts.
//!
//! The interrupt-dispatch layer registers [`handle_page_fault`] for vector
//! [`PAGE_FAULT_VECTOR`], passing CR2 and the error code the CPU pushed.

use crate::phys_mapper::PhysmapMapper;
use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::address_space::Walk;
use kernel_vmem::{AddressSpace, PhysMapper};
use log::error;

pub const PAGE_FAULT_VECTOR: usize = 0x0E; // 14

/// Page-fault error code layout (i386).
///
/// Each bit describes the condition that caused the page fault.
/// Reference: Intel SDM Vol. 3A, §6.15.1 "Page-Fault Exception (#PF)".
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageFaultError {
    /// 0 = non-present page.
    /// 1 = protection violation (page present but access disallowed).
    pub present: bool, // bit 0

    /// 0 = read or execute.
    /// 1 = write access.
    pub write: bool, // bit 1

    /// 0 = supervisor (CPL 0–2).
    /// 1 = user mode (CPL 3).
    pub user: bool, // bit 2

    /// 1 = caused by reserved bit set in a paging structure.
    pub reserved_bit: bool, // bit 3

    /// 1 = instruction fetch.
    pub instruction_fetch: bool, // bit 4

    #[bits(27)]
    __: u32, // reserved / ignored bits
}

impl PageFaultError {
    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if self.reserved_bit() {
            "Reserved bit set in a paging structure"
        } else if !self.present() {
            if self.user() {
                "User-mode access to a non-present page"
            } else {
                "Kernel access to a non-present page"
            }
        } else if self.instruction_fetch() {
            "Instruction fetch from a protected page"
        } else if self.write() {
            if self.user() {
                "User-mode write to a read-only or supervisor page"
            } else {
                "Kernel write to a read-only page"
            }
        } else if self.user() {
            "User-mode read of a supervisor page"
        } else {
            "Read access to protected page"
        }
    }
}

/// Everything known about one page fault.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PageFaultReport {
    pub address: VirtualAddress,
    pub error: PageFaultError,
    pub walk: Walk,
    /// The physical address `address` aliases, if it lies in the physmap.
    pub physmap_alias: Option<PhysicalAddress>,
}

/// Log both levels of the translation of `va` in `space`.
pub fn dump_walk<M: PhysMapper>(space: &AddressSpace<'_, M>, va: VirtualAddress) -> Walk {
    let walk = space.walk(va);
    let pde = walk.pde.flags();
    error!(
        "  PDE[{:4}]={:08x} P={} RW={} US={}",
        va.as_u32() >> 22,
        walk.pde.raw(),
        u8::from(pde.present()),
        u8::from(pde.writable()),
        u8::from(pde.user_access())
    );
    match walk.pte {
        Some(pte) => {
            let flags = pte.flags();
            error!(
                "  PTE[{:4}]={:08x} P={} RW={} US={}",
                (va.as_u32() >> 12) & 0x3FF,
                pte.raw(),
                u8::from(flags.present()),
                u8::from(flags.writable()),
                u8::from(flags.user_access())
            );
        }
        None => error!("  PTE: no page table"),
    }
    walk
}

/// Log a page fault in full and return what was found.
pub fn report_page_fault<M: PhysMapper>(
    space: &AddressSpace<'_, M>,
    address: VirtualAddress,
    error: PageFaultError,
) -> PageFaultReport {
    error!(
        "PAGE FAULT: cr2={address} err={:#x} in directory {}",
        error.into_bits(),
        space.root_page()
    );
    error!("{}", error.explain());
    error!("{error:?}");

    let physmap_alias = PhysmapMapper::virt_to_phys(address);
    if let Some(pa) = physmap_alias {
        error!("  physmap alias of {pa}");
    }
    let walk = dump_walk(space, address);
    PageFaultReport {
        address,
        error,
        walk,
        physmap_alias,
    }
}

/// Unhandled-fault policy: report, then halt for good.
pub fn handle_page_fault<M: PhysMapper>(
    space: &AddressSpace<'_, M>,
    address: VirtualAddress,
    error: PageFaultError,
) -> ! {
    report_page_fault(space, address, error);
    error!("halting after unhandled page fault");
    kernel_sync::irq::halt()
}
