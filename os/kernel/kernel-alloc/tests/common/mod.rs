//! Simulated 8 MiB machine shared by the integration tests.

#![allow(dead_code)]

use core::cell::{Cell, RefCell, UnsafeCell};
use kernel_alloc::context::KernelMemory;
use kernel_info::boot::{BootMemory, E801MemorySize, E820Entry, KernelImage, MemoryRegionType};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_vmem::{Mmu, PhysMapper};

pub const RAM_FRAMES: usize = 2048;

/// 7 MiB above the first, as E801 reports it.
pub const SIZE_8M: E801MemorySize = E801MemorySize {
    low_kib: 7 * 1024,
    high_64k: 0,
};

pub fn regions() -> [E820Entry; 3] {
    [
        E820Entry::new(0, 0x9_F000, MemoryRegionType::Usable),
        E820Entry::new(0x9_F000, 0x6_1000, MemoryRegionType::Reserved),
        E820Entry::new(0x10_0000, 0x70_0000, MemoryRegionType::Usable),
    ]
}

pub fn kernel_image() -> KernelImage {
    KernelImage::new(PhysicalAddress::new(0x10_0000), PhysicalAddress::new(0x18_0000))
}

#[repr(C, align(4096))]
pub struct Frame([u8; 4096]);

/// Simulated physical memory: frame `n` lives at physical address `n * 4096`,
/// and consecutive frames are consecutive in host memory.
pub struct TestPhys {
    frames: Vec<UnsafeCell<Frame>>,
}

impl TestPhys {
    pub fn new() -> Self {
        let mut frames = Vec::with_capacity(RAM_FRAMES);
        for _ in 0..RAM_FRAMES {
            frames.push(UnsafeCell::new(Frame([0; 4096])));
        }
        Self { frames }
    }

    fn byte_ptr(&self, pa: u32) -> *mut u8 {
        let base = UnsafeCell::raw_get(self.frames.as_ptr()).cast::<u8>();
        assert!((pa as usize) < RAM_FRAMES * 4096, "{pa:#x} is not installed");
        base.wrapping_add(pa as usize)
    }

    pub fn read_u32(&self, pa: PhysicalAddress) -> u32 {
        unsafe { self.byte_ptr(pa.as_u32()).cast::<u32>().read() }
    }

    pub fn write_u32(&self, pa: PhysicalAddress, v: u32) {
        unsafe { self.byte_ptr(pa.as_u32()).cast::<u32>().write(v) }
    }
}

impl PhysMapper for TestPhys {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { &mut *self.byte_ptr(pa.as_u32()).cast::<T>() }
    }
}

/// Records CR3 loads and TLB flushes.
#[derive(Default)]
pub struct FakeMmu {
    root: Cell<Option<PhysicalPage<Size4K>>>,
    loads: Cell<usize>,
    flushed: RefCell<Vec<VirtualAddress>>,
}

impl FakeMmu {
    pub fn loads(&self) -> usize {
        self.loads.get()
    }

    pub fn flushed(&self) -> Vec<VirtualAddress> {
        self.flushed.borrow().clone()
    }

    /// Pretend something else wrote CR3.
    pub fn force_root(&self, root: PhysicalPage<Size4K>) {
        self.root.set(Some(root));
    }
}

impl Mmu for FakeMmu {
    unsafe fn load_root(&self, root: PhysicalPage<Size4K>) {
        self.root.set(Some(root));
        self.loads.set(self.loads.get() + 1);
    }

    fn active_root(&self) -> PhysicalPage<Size4K> {
        self.root
            .get()
            .unwrap_or_else(|| PhysicalPage::from_frame_number(0))
    }

    fn flush_page(&self, va: VirtualAddress) {
        self.flushed.borrow_mut().push(va);
    }
}

/// Bring up PFA and VMM on the simulated machine.
pub fn bring_up<'m>(
    phys: &'m TestPhys,
    mmu: &'m FakeMmu,
    regions: &[E820Entry],
) -> KernelMemory<'m, TestPhys, FakeMmu> {
    let _ = kernel_qemu::logger::init(log::LevelFilter::Trace);
    let boot = BootMemory::new(SIZE_8M, regions);
    unsafe { KernelMemory::bring_up(&boot, kernel_image(), phys, mmu) }.unwrap()
}
