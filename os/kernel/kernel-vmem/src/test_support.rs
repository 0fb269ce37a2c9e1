//! Fake RAM, frame pool and MMU for unit tests.

use crate::{FrameAlloc, Mmu, PhysMapper};
use core::cell::{Cell, RefCell, UnsafeCell};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};

/// A trivial **bump** allocator that remembers what was given back.
///
/// Hands out `count` frames starting at `start`. Released frames are recorded
/// and never reused, so tests can tell exactly which frames came back.
pub struct BumpAlloc {
    next: u32,
    end: u32,
    handed_out: usize,
    released: Vec<PhysicalPage<Size4K>>,
}

impl BumpAlloc {
    pub fn new(start: u32, count: u32) -> Self {
        Self {
            next: start,
            end: start + count * 4096,
            handed_out: 0,
            released: Vec::new(),
        }
    }

    pub const fn handed_out(&self) -> usize {
        self.handed_out
    }

    pub fn released(&self) -> &[PhysicalPage<Size4K>] {
        &self.released
    }

    /// Frames handed out and not yet released.
    pub fn outstanding(&self) -> usize {
        self.handed_out - self.released.len()
    }
}

impl FrameAlloc for BumpAlloc {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        if self.next >= self.end {
            return None;
        }
        let p = self.next;
        self.next += 4096;
        self.handed_out += 1;
        Some(PhysicalPage::from_addr(PhysicalAddress::new(p)))
    }

    fn free_4k(&mut self, page: PhysicalPage<Size4K>) {
        self.released.push(page);
    }
}

/// A 4 KiB-aligned raw frame.
#[repr(C, align(4096))]
pub struct Aligned4K([u8; 4096]);

/// Simulated physical memory: frame `n` lives at physical address `n * 4096`.
pub struct TestPhys {
    frames: Vec<UnsafeCell<Aligned4K>>,
}

impl TestPhys {
    pub fn with_frames(n: usize) -> Self {
        let mut frames = Vec::with_capacity(n);
        for _ in 0..n {
            frames.push(UnsafeCell::new(Aligned4K([0; 4096])));
        }
        Self { frames }
    }

    fn byte_ptr(&self, pa: u32) -> *mut u8 {
        let frame = self.frames[(pa >> 12) as usize].get().cast::<u8>();
        // SAFETY: the offset stays inside the 4 KiB frame.
        unsafe { frame.add((pa & 0xFFF) as usize) }
    }

    pub fn read_u32(&self, pa: u32) -> u32 {
        // SAFETY: in-bounds, aligned by construction of the callers.
        unsafe { self.byte_ptr(pa).cast::<u32>().read() }
    }

    pub fn write_u32(&self, pa: u32, v: u32) {
        // SAFETY: see `read_u32`.
        unsafe { self.byte_ptr(pa).cast::<u32>().write(v) }
    }
}

impl PhysMapper for TestPhys {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        // SAFETY: the caller promises `T` matches the bytes at `pa`.
        unsafe { &mut *self.byte_ptr(pa.as_u32()).cast::<T>() }
    }
}

/// Records every interaction instead of touching CR3 or the TLB.
#[derive(Default)]
pub struct FakeMmu {
    root: Cell<Option<PhysicalPage<Size4K>>>,
    flushed: RefCell<Vec<VirtualAddress>>,
}

impl FakeMmu {
    pub fn flushed(&self) -> Vec<VirtualAddress> {
        self.flushed.borrow().clone()
    }
}

impl Mmu for FakeMmu {
    unsafe fn load_root(&self, root: PhysicalPage<Size4K>) {
        self.root.set(Some(root));
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
