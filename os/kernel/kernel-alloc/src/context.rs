//! The memory subsystems of one machine, owned together.

use crate::frame_alloc::{BitmapFrameAlloc, FrameAllocError};
use crate::kheap::{self, HeapConfig, KernelHeap, KernelHeapError};
use crate::vmm::{Vmm, VmmError};
use kernel_info::boot::{BootMemory, KernelImage};
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{AddressSpace, Mmu, PageEntryBits, PhysMapper};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MemoryInitError {
    #[error(transparent)]
    FrameAlloc(#[from] FrameAllocError),
    #[error(transparent)]
    Vmm(#[from] VmmError),
}

/// Frame allocator and VMM.
///
/// Every operation that needs frames borrows them from [`frames`](Self::frames),
/// so independent contexts (one per test, say) never share state.
pub struct KernelMemory<'m, M: PhysMapper, U: Mmu> {
    pub frames: BitmapFrameAlloc<'m>,
    pub vmm: Vmm<'m, M, U>,
}

impl<'m, M: PhysMapper, U: Mmu> KernelMemory<'m, M, U> {
    /// PFA init, then VMM init with the switch to the kernel directory.
    ///
    /// # Errors
    /// Whatever the failing stage reports.
    ///
    /// # Safety
    /// See [`BitmapFrameAlloc::init`] and [`Vmm::init`].
    pub unsafe fn bring_up(
        boot: &BootMemory<'_>,
        image: KernelImage,
        mapper: &'m M,
        mmu: &'m U,
    ) -> Result<Self, MemoryInitError> {
        let mut frames = unsafe { BitmapFrameAlloc::init(boot, image, mapper) }?;
        let total = frames.total_frames();
        let vmm = unsafe { Vmm::init(&mut frames, mapper, mmu, total) }?;
        frames.log_summary();
        Ok(Self { frames, vmm })
    }

    #[must_use]
    pub const fn from_parts(frames: BitmapFrameAlloc<'m>, vmm: Vmm<'m, M, U>) -> Self {
        Self { frames, vmm }
    }

    /// See [`Vmm::create_address_space`].
    ///
    /// # Errors
    /// [`VmmError::AddressSpace`] if no frame is available.
    pub fn create_address_space(&mut self) -> Result<AddressSpace<'m, M>, VmmError> {
        self.vmm.create_address_space(&mut self.frames)
    }

    /// See [`Vmm::clone_page_directory`].
    ///
    /// # Errors
    /// [`VmmError::AddressSpace`] if frames run out.
    pub fn clone_page_directory(&mut self) -> Result<AddressSpace<'m, M>, VmmError> {
        self.vmm.clone_page_directory(&mut self.frames)
    }

    /// See [`Vmm::destroy_address_space`].
    ///
    /// # Errors
    /// [`VmmError::InUse`] for the kernel or the active directory.
    pub fn destroy_address_space(&mut self, space: AddressSpace<'_, M>) -> Result<(), VmmError> {
        self.vmm.destroy_address_space(&mut self.frames, space)
    }

    /// See [`AddressSpace::alloc_region`].
    ///
    /// # Errors
    /// [`VmmError::AddressSpace`] when frames run out; no rollback.
    pub fn alloc_region(
        &mut self,
        space: &AddressSpace<'_, M>,
        va: VirtualAddress,
        size: u32,
        flags: PageEntryBits,
    ) -> Result<usize, VmmError> {
        Ok(space.alloc_region(&mut self.frames, va, size, flags)?)
    }

    /// See [`AddressSpace::free_region`]; kernel tables stay in place.
    pub fn free_region(&mut self, space: &AddressSpace<'_, M>, va: VirtualAddress, size: u32) -> usize {
        let kernel = self.vmm.kernel_space();
        space.free_region(&mut self.frames, self.vmm.mmu(), va, size, &kernel)
    }

    /// Reserve a heap window in the kernel address space.
    ///
    /// # Errors
    /// See [`kheap::map_heap_region`].
    ///
    /// # Safety
    /// See [`kheap::reserve`]; the kernel directory must be active.
    pub unsafe fn create_heap(&mut self, config: HeapConfig) -> Result<KernelHeap, KernelHeapError> {
        let kernel = self.vmm.kernel_space();
        unsafe { kheap::reserve(&kernel, &mut self.frames, config) }
    }
}
