//! # Virtual Memory Manager
//!
//! Owns the kernel's page directory and tracks the active one.
//!
//! ```text
//!  kernel directory                        cloned directory
//!  ┌──────────────┐                        ┌──────────────┐
//!  │ PDE 0        │──► identity table ◄────│ PDE 0        │   shared
//!  │ PDE 1..      │──► user table          │ PDE 1..      │──► deep copy
//!  │ PDE 0x300..  │──► physmap tables ◄────│ PDE 0x300..  │   shared
//!  └──────────────┘                        └──────────────┘
//! ```
//!
//! Directory slots linking the same table as the kernel directory are shared
//! by every clone; all others are copied page by page.

use kernel_info::memory::{IDENTITY_MAP_END, PAGE_SIZE, PHYSMAP_BASE, PHYSMAP_LIMIT};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::address_space::RootPage;
use kernel_vmem::{AddressSpace, AddressSpaceError, FrameAlloc, Mmu, PageEntryBits, PhysMapper};
use log::{debug, error, info, warn};

/// Hard failures of the VMM front end.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmmError {
    /// Building the kernel directory failed; the machine cannot continue.
    #[error("failed to build the kernel address space: {0}")]
    KernelSpace(AddressSpaceError),
    /// The directory handed in is the kernel's or the active one.
    #[error("address space {0} is still in use")]
    InUse(RootPage),
    #[error(transparent)]
    AddressSpace(#[from] AddressSpaceError),
}

/// Kernel and active page directories.
pub struct Vmm<'m, M: PhysMapper, U: Mmu> {
    mapper: &'m M,
    mmu: &'m U,
    kernel: RootPage,
    current: RootPage,
}

impl<'m, M: PhysMapper, U: Mmu> Vmm<'m, M, U> {
    /// Build the kernel address space and make it active.
    ///
    /// - The first MiB is identity mapped.
    /// - Frames `0..total_frames` are mapped at `PHYSMAP_BASE + pa`, up to
    ///   [`PHYSMAP_LIMIT`]; memory beyond that stays unreachable.
    ///
    /// # Errors
    /// [`VmmError::KernelSpace`] if frames run out while building the tables.
    ///
    /// # Safety
    /// `mapper` must reach every frame `alloc` hands out, both before and after
    /// the switch, and the running code must be covered by the new mappings.
    pub unsafe fn init<A: FrameAlloc>(
        alloc: &mut A,
        mapper: &'m M,
        mmu: &'m U,
        total_frames: u32,
    ) -> Result<Self, VmmError> {
        let kernel = AddressSpace::create(mapper, alloc).map_err(VmmError::KernelSpace)?;
        let flags = PageEntryBits::kernel_rw();

        for pa in (0..IDENTITY_MAP_END).step_by(PAGE_SIZE as usize) {
            kernel
                .map_page(alloc, VirtualAddress::new(pa), PhysicalAddress::new(pa), flags)
                .map_err(VmmError::KernelSpace)?;
        }

        let reachable = PHYSMAP_LIMIT / PAGE_SIZE;
        let frames = if total_frames > reachable {
            warn!(
                "physmap covers {reachable} of {total_frames} frames; memory above {PHYSMAP_LIMIT:#x} is unreachable"
            );
            reachable
        } else {
            total_frames
        };
        for frame in 0..frames {
            let pa = frame * PAGE_SIZE;
            kernel
                .map_page(
                    alloc,
                    VirtualAddress::new(PHYSMAP_BASE + pa),
                    PhysicalAddress::new(pa),
                    flags,
                )
                .map_err(VmmError::KernelSpace)?;
        }
        info!(
            "VMM: identity map 0..{IDENTITY_MAP_END:#x}, physmap {PHYSMAP_BASE:#x}..{:#x} ({frames} frames), directory {}",
            u64::from(PHYSMAP_BASE) + u64::from(frames) * u64::from(PAGE_SIZE),
            kernel.root_page()
        );

        unsafe { kernel.activate(mmu) };
        Ok(Self {
            mapper,
            mmu,
            kernel: kernel.root_page(),
            current: kernel.root_page(),
        })
    }

    #[inline]
    #[must_use]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }

    #[inline]
    #[must_use]
    pub const fn mmu(&self) -> &'m U {
        self.mmu
    }

    /// The kernel's page directory.
    #[inline]
    #[must_use]
    pub const fn kernel_space(&self) -> AddressSpace<'m, M> {
        AddressSpace::from_root(self.mapper, self.kernel)
    }

    /// The directory last installed through [`switch_pagedir`](Self::switch_pagedir)
    /// or found by [`read_active_pagedir`](Self::read_active_pagedir).
    #[inline]
    #[must_use]
    pub const fn current_space(&self) -> AddressSpace<'m, M> {
        AddressSpace::from_root(self.mapper, self.current)
    }

    /// A fresh, empty page directory.
    ///
    /// # Errors
    /// [`VmmError::AddressSpace`] if no frame is available.
    pub fn create_address_space<A: FrameAlloc>(
        &self,
        alloc: &mut A,
    ) -> Result<AddressSpace<'m, M>, VmmError> {
        Ok(AddressSpace::create(self.mapper, alloc)?)
    }

    /// Duplicate the current address space for a new process.
    ///
    /// Kernel tables are shared, everything else is copied.
    ///
    /// # Errors
    /// [`VmmError::AddressSpace`] if frames run out; nothing is left allocated.
    pub fn clone_page_directory<A: FrameAlloc>(
        &self,
        alloc: &mut A,
    ) -> Result<AddressSpace<'m, M>, VmmError> {
        let clone = self
            .current_space()
            .clone_with_shared(alloc, &self.kernel_space())
            .inspect_err(|e| warn!("clone of {} failed: {e}", self.current))?;
        debug!("cloned {} into {}", self.current, clone.root_page());
        Ok(clone)
    }

    /// Release an address space obtained from this VMM.
    ///
    /// # Errors
    /// [`VmmError::InUse`] for the kernel or the active directory; nothing is freed.
    pub fn destroy_address_space<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        space: AddressSpace<'_, M>,
    ) -> Result<(), VmmError> {
        let root = space.root_page();
        if root == self.kernel || root == self.current {
            error!("refusing to destroy the in-use directory {root}");
            return Err(VmmError::InUse(root));
        }
        space.destroy(alloc, &self.kernel_space());
        Ok(())
    }

    /// Make `space` the active address space.
    ///
    /// # Safety
    /// `space` must map the running code, its stack and the physmap.
    pub unsafe fn switch_pagedir(&mut self, space: &AddressSpace<'_, M>) {
        unsafe { space.activate(self.mmu) };
        self.current = space.root_page();
    }

    /// The directory the MMU is actually using; also updates the current one.
    pub fn read_active_pagedir(&mut self) -> AddressSpace<'m, M> {
        self.current = self.mmu.active_root();
        self.current_space()
    }
}
