//! # Kernel Heap
//!
//! A [`BuddyHeap`] placed in a virtual window that the VMM backs with frames
//! up front, plus the process-wide kernel heap behind an [`IrqSpinLock`].
//!
//! ```text
//!  HeapConfig { start, size, .. }
//!        │  HeapLayout::compute     (align, largest power of two)
//!        ▼
//!  AddressSpace::alloc_region       (frames for every page)
//!        │
//!        ▼
//!  BuddyHeap::with_layout           (one free block of the managed size)
//! ```
//!
//! After setup the heap never calls back into the PFA or the VMM; once the
//! window is exhausted, allocations fail.

use crate::buddy::{BuddyHeap, HEADER_SIZE, HeapError, HeapLayout, HeapStats};
use core::alloc::{GlobalAlloc, Layout};
use core::ptr;
use kernel_info::memory::{KERNEL_HEAP_BASE, KERNEL_HEAP_SIZE};
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::IrqSpinLock;
use kernel_vmem::{AddressSpace, AddressSpaceError, FrameAlloc, PageEntryBits, PhysMapper};
use log::{error, info};

/// Where a heap lives and who may touch it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HeapConfig {
    pub start: VirtualAddress,
    pub size: u32,
    /// Largest single allocation including its header; `0` means no limit
    /// beyond the managed size.
    pub max_size: u32,
    /// Map the window supervisor-only; otherwise user code may access it too.
    pub supervisor: bool,
    /// Recorded for the owner's bookkeeping. The window itself stays
    /// writable since free-list nodes and headers live inside it.
    pub readonly: bool,
}

impl HeapConfig {
    /// The kernel heap at [`KERNEL_HEAP_BASE`].
    #[must_use]
    pub const fn kernel() -> Self {
        Self {
            start: VirtualAddress::new(KERNEL_HEAP_BASE),
            size: KERNEL_HEAP_SIZE,
            max_size: KERNEL_HEAP_SIZE,
            supervisor: true,
            readonly: false,
        }
    }

    /// Leaf flags for the heap window.
    #[must_use]
    pub const fn page_flags(&self) -> PageEntryBits {
        if self.supervisor {
            PageEntryBits::kernel_rw()
        } else {
            PageEntryBits::user_rw()
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum KernelHeapError {
    #[error(transparent)]
    Heap(#[from] HeapError),
    #[error("failed to map the heap window: {0}")]
    Map(#[from] AddressSpaceError),
    #[error("the kernel heap is already installed")]
    AlreadyInstalled,
}

/// Back the window described by `config` with frames in `space`.
///
/// Returns the buddy layout of the window.
///
/// # Errors
/// - [`KernelHeapError::Heap`] if the window cannot hold a buddy heap.
/// - [`KernelHeapError::Map`] if frames run out. Pages mapped so far stay
///   mapped; release them with `free_region` over the returned window.
pub fn map_heap_region<M: PhysMapper, A: FrameAlloc>(
    space: &AddressSpace<'_, M>,
    alloc: &mut A,
    config: &HeapConfig,
) -> Result<HeapLayout, KernelHeapError> {
    let layout = HeapLayout::compute(config.start.as_usize(), config.size as usize)?;
    let start = u32::try_from(layout.start).map_err(|_| HeapError::RegionTooSmall)?;
    let size = u32::try_from(layout.managed_size).map_err(|_| HeapError::RegionTooSmall)?;

    let backed = space.alloc_region(alloc, VirtualAddress::new(start), size, config.page_flags())?;
    info!(
        "heap window {start:#010x}+{size:#x}: order {}, {backed} pages backed, supervisor={}, readonly={}",
        layout.max_order, config.supervisor, config.readonly
    );
    Ok(layout)
}

/// Map the heap window and build a heap over it.
///
/// # Errors
/// See [`map_heap_region`].
///
/// # Safety
/// `space` must be the active address space, and nothing else may use the
/// window while the heap lives.
pub unsafe fn reserve<M: PhysMapper, A: FrameAlloc>(
    space: &AddressSpace<'_, M>,
    alloc: &mut A,
    config: HeapConfig,
) -> Result<KernelHeap, KernelHeapError> {
    let layout = map_heap_region(space, alloc, &config)?;
    let base = ptr::with_exposed_provenance_mut::<u8>(layout.start);
    let heap = unsafe { BuddyHeap::with_layout(base, layout, config.max_size as usize) }?;
    Ok(KernelHeap { heap, config })
}

/// A heap and the configuration it was built from.
pub struct KernelHeap {
    heap: BuddyHeap,
    config: HeapConfig,
}

impl KernelHeap {
    #[must_use]
    pub const fn from_parts(heap: BuddyHeap, config: HeapConfig) -> Self {
        Self { heap, config }
    }

    #[must_use]
    pub const fn config(&self) -> &HeapConfig {
        &self.config
    }

    #[must_use]
    pub const fn heap(&self) -> &BuddyHeap {
        &self.heap
    }

    pub const fn heap_mut(&mut self) -> &mut BuddyHeap {
        &mut self.heap
    }
}

/// The kernel heap.
pub static KERNEL_HEAP: IrqSpinLock<Option<KernelHeap>> = IrqSpinLock::new(None);

/// Make `heap` the kernel heap.
///
/// # Errors
/// [`KernelHeapError::AlreadyInstalled`] if one is installed already; `heap`
/// is dropped and its window stays mapped.
pub fn install_kernel_heap(heap: KernelHeap) -> Result<(), KernelHeapError> {
    KERNEL_HEAP.with_lock(|slot| {
        if slot.is_some() {
            error!("kernel heap already installed");
            return Err(KernelHeapError::AlreadyInstalled);
        }
        *slot = Some(heap);
        Ok(())
    })
}

/// Run `f` on the kernel heap; `None` if it is not installed.
pub fn with_kernel_heap<R>(f: impl FnOnce(&mut BuddyHeap) -> R) -> Option<R> {
    let result = KERNEL_HEAP.with_lock(|slot| slot.as_mut().map(|k| f(&mut k.heap)));
    if result.is_none() {
        error!("kernel heap used before installation");
    }
    result
}

/// Free-space summary of the kernel heap.
#[must_use]
pub fn kernel_heap_stats() -> Option<HeapStats> {
    with_kernel_heap(|heap| heap.stats())
}

/// Allocate from the kernel heap; null on failure.
#[must_use]
pub fn kmalloc(size: usize) -> *mut u8 {
    with_kernel_heap(|heap| heap.allocate(size).ok())
        .flatten()
        .map_or(ptr::null_mut(), ptr::NonNull::as_ptr)
}

/// Return memory to the kernel heap. Null and foreign pointers are ignored.
///
/// # Safety
/// `ptr` must not be used afterwards.
pub unsafe fn kfree(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    // Rejections are logged by the heap.
    let _ = with_kernel_heap(|heap| unsafe { heap.free(ptr) });
}

/// Resize a kernel heap allocation; null on failure or when `size` is zero.
///
/// On failure the original allocation stays valid.
///
/// # Safety
/// As for [`BuddyHeap::reallocate`].
#[must_use]
pub unsafe fn krealloc(ptr: *mut u8, size: usize) -> *mut u8 {
    with_kernel_heap(|heap| unsafe { heap.reallocate(ptr, size) }.ok().flatten())
        .flatten()
        .map_or(ptr::null_mut(), ptr::NonNull::as_ptr)
}

/// [`GlobalAlloc`] over the kernel heap.
///
/// Allocations are 8-byte aligned; larger alignments fail with null.
///
/// ```ignore
/// #[global_allocator]
/// static GLOBAL_ALLOCATOR: KernelAllocator = KernelAllocator;
/// ```
pub struct KernelAllocator;

impl KernelAllocator {
    /// Strongest alignment the heap guarantees.
    pub const MAX_ALIGN: usize = HEADER_SIZE;
}

unsafe impl GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > Self::MAX_ALIGN {
            return ptr::null_mut();
        }
        kmalloc(layout.size())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        unsafe { kfree(ptr) }
    }

    /// Allocate and zero a block.
    ///
    /// Note: zeroing is performed after allocation succeeds.
    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let p = unsafe { self.alloc(layout) };
        if !p.is_null() {
            unsafe { ptr::write_bytes(p, 0, layout.size()) };
        }
        p
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > Self::MAX_ALIGN {
            return ptr::null_mut();
        }
        unsafe { krealloc(ptr, new_size) }
    }
}
