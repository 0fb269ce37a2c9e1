mod common;

use common::{FakeMmu, TestPhys, bring_up, regions};
use kernel_alloc::kheap::{HeapConfig, map_heap_region};
use kernel_alloc::page_fault::{PageFaultError, report_page_fault};
use kernel_alloc::vmm::{Vmm, VmmError};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_vmem::{AddressSpace, AddressSpaceError, Mmu, PageEntryBits};

/// Frames taken by the VMM at init: directory, identity table, two physmap tables.
const VMM_FRAMES: u32 = 4;
/// Low memory, kernel image and one bitmap frame.
const RESERVED_FRAMES: u32 = 0x181;

const USER_VA: u32 = 0x4000_0000;

fn page(frame: u32) -> PhysicalPage<Size4K> {
    PhysicalPage::from_frame_number(frame)
}

#[test]
fn bring_up_builds_kernel_directory() {
    let phys = TestPhys::new();
    let mmu = FakeMmu::default();
    let regions = regions();
    let memory = bring_up(&phys, &mmu, &regions);

    let kernel = memory.vmm.kernel_space();
    assert_eq!(mmu.loads(), 1);
    assert_eq!(kernel.root_page(), page(0x181));
    assert_eq!(mmu.active_root(), kernel.root_page());
    assert_eq!(memory.vmm.current_space().root_page(), kernel.root_page());

    // Identity window.
    assert_eq!(kernel.get_phys_frame(VirtualAddress::new(0)), Some(page(0)));
    assert_eq!(
        kernel.query(VirtualAddress::new(0xB_8123)),
        Some(PhysicalAddress::new(0xB_8123))
    );
    assert_eq!(kernel.get_phys_frame(VirtualAddress::new(0x10_0000)), None);

    // Physmap window.
    assert_eq!(
        kernel.query(VirtualAddress::new(0xC020_0123)),
        Some(PhysicalAddress::new(0x20_0123))
    );
    assert_eq!(
        kernel.get_phys_frame(VirtualAddress::new(0xC07F_F000)),
        Some(page(0x7FF))
    );
    assert_eq!(kernel.get_phys_frame(VirtualAddress::new(0xC080_0000)), None);

    let walk = kernel.walk(VirtualAddress::new(0xC000_0000));
    assert!(!walk.pde.flags().user_access());
    assert!(walk.pte.is_some_and(|pte| pte.flags().writable()));

    assert_eq!(memory.frames.total_frames(), 2048);
    assert_eq!(memory.frames.used_frames(), RESERVED_FRAMES + VMM_FRAMES);
}

#[test]
fn physmap_stops_at_its_limit() {
    let phys = TestPhys::new();
    let mmu = FakeMmu::default();
    let regions = regions();
    let mut memory = bring_up(&phys, &mmu, &regions);
    let free = memory.frames.free_frames();

    // Pretend the machine has 1 GiB; only the table frames come from the fake RAM.
    let vmm = unsafe { Vmm::init(&mut memory.frames, &phys, &mmu, 0x4_0000) }.unwrap();
    let kernel = vmm.kernel_space();
    assert_eq!(mmu.loads(), 2);

    assert_eq!(
        kernel.get_phys_frame(VirtualAddress::new(0xEFFF_F000)),
        Some(page(0x2_FFFF))
    );
    assert_eq!(kernel.get_phys_frame(VirtualAddress::new(0xF000_0000)), None);
    // Directory, identity table and 192 physmap tables.
    assert_eq!(memory.frames.free_frames(), free - 194);
}

#[test]
fn bitmap_lives_behind_the_kernel_image() {
    let phys = TestPhys::new();
    let mmu = FakeMmu::default();
    let regions = regions();
    let memory = bring_up(&phys, &mmu, &regions);

    assert_eq!(
        memory.frames.bitmap_range(),
        (PhysicalAddress::new(0x18_0000), PhysicalAddress::new(0x18_1000))
    );
    // Frames 0..32 are all low memory.
    assert_eq!(phys.read_u32(PhysicalAddress::new(0x18_0000)), u32::MAX);
    // Word 12 covers frames 0x180..0x1A0: the bitmap plus the four VMM frames.
    assert_eq!(phys.read_u32(PhysicalAddress::new(0x18_0000 + 12 * 4)), 0x1F);
}

#[test]
fn frame_accounting_holds_across_alloc_and_free() {
    let phys = TestPhys::new();
    let mmu = FakeMmu::default();
    let regions = regions();
    let mut memory = bring_up(&phys, &mmu, &regions);
    let pfa = &mut memory.frames;

    let mut held = Vec::new();
    for round in 0..64u32 {
        let a = pfa.frame_alloc().unwrap();
        let b = pfa.frame_alloc().unwrap();
        assert_ne!(a, b);
        assert!(a.is_aligned::<Size4K>() && b.is_aligned::<Size4K>());
        assert_eq!(pfa.used_frames() + pfa.free_frames(), pfa.total_frames());
        held.push(a);
        if round % 3 == 0 {
            let _ = pfa.frame_free(b);
        } else {
            held.push(b);
        }
        assert_eq!(pfa.used_frames() + pfa.free_frames(), pfa.total_frames());
    }
    for pa in held {
        assert!(pfa.frame_free(pa).is_applied());
    }
    assert_eq!(pfa.used_frames(), RESERVED_FRAMES + VMM_FRAMES);
}

#[test]
fn freed_frame_comes_back_first() {
    let phys = TestPhys::new();
    let mmu = FakeMmu::default();
    let regions = regions();
    let mut memory = bring_up(&phys, &mmu, &regions);
    let pfa = &mut memory.frames;

    let p = pfa.frame_alloc().unwrap();
    let _other = pfa.frame_alloc().unwrap();
    let _ = pfa.frame_free(p);
    assert_eq!(pfa.frame_alloc(), Some(p));
}

#[test]
fn double_frame_free_is_idempotent() {
    let phys = TestPhys::new();
    let mmu = FakeMmu::default();
    let regions = regions();
    let mut memory = bring_up(&phys, &mmu, &regions);
    let pfa = &mut memory.frames;

    let p = pfa.frame_alloc().unwrap();
    assert!(pfa.frame_free(p).is_applied());
    let used = pfa.used_frames();
    assert!(pfa.frame_free(p).is_skipped());
    assert_eq!(pfa.used_frames(), used);
    assert_eq!(pfa.used_frames() + pfa.free_frames(), pfa.total_frames());
}

#[test]
fn region_map_unmap_round_trip() {
    let phys = TestPhys::new();
    let mmu = FakeMmu::default();
    let regions = regions();
    let mut memory = bring_up(&phys, &mmu, &regions);
    let space = memory.create_address_space().unwrap();
    let va = VirtualAddress::new(USER_VA);
    let free_before = memory.frames.free_frames();
    let used_before = memory.frames.used_frames();

    let backed = memory
        .alloc_region(&space, va, 3 * 4096, PageEntryBits::user_rw())
        .unwrap();
    assert_eq!(backed, 3);
    for i in 0..3 {
        assert!(space.get_phys_frame(va + i * 4096).is_some());
    }
    // Three pages plus their table.
    assert_eq!(memory.frames.free_frames(), free_before - 4);

    assert_eq!(memory.free_region(&space, va, 3 * 4096), 3);
    for i in 0..3 {
        assert_eq!(space.get_phys_frame(va + i * 4096), None);
    }
    assert!(!space.walk(va).pde.is_present());
    assert_eq!(memory.frames.free_frames(), free_before);
    assert_eq!(memory.frames.used_frames(), used_before);
    assert_eq!(mmu.flushed(), vec![va, va + 4096, va + 8192]);
}

#[test]
fn alloc_region_failure_leaves_partial_mapping() {
    let phys = TestPhys::new();
    let mmu = FakeMmu::default();
    let regions = regions();
    let mut memory = bring_up(&phys, &mmu, &regions);
    let kernel = memory.vmm.kernel_space();
    let va = VirtualAddress::new(USER_VA);

    let mut hoard = Vec::new();
    while memory.frames.free_frames() > 2 {
        hoard.push(memory.frames.frame_alloc().unwrap());
    }

    let result = memory.alloc_region(&kernel, va, 4 * 4096, PageEntryBits::kernel_rw());
    assert_eq!(result, Err(VmmError::AddressSpace(AddressSpaceError::OutOfMemory)));
    assert!(kernel.get_phys_frame(va).is_some());
    assert_eq!(kernel.get_phys_frame(va + 4096), None);

    // The caller undoes the partial mapping.
    assert_eq!(memory.free_region(&kernel, va, 4 * 4096), 1);
    // The page comes back; the kernel table stays.
    assert_eq!(memory.frames.free_frames(), 1);
}

#[test]
fn clone_isolates_user_pages_and_shares_kernel_tables() {
    let phys = TestPhys::new();
    let mmu = FakeMmu::default();
    let regions = regions();
    let mut memory = bring_up(&phys, &mmu, &regions);
    let kernel = memory.vmm.kernel_space();
    let va = VirtualAddress::new(USER_VA);

    let parent = memory.clone_page_directory().unwrap();
    memory
        .alloc_region(&parent, va, 4096, PageEntryBits::user_rw())
        .unwrap();
    let parent_frame = parent.get_phys_frame(va).unwrap();
    phys.write_u32(parent_frame.base(), 0xDEAD_BEEF);
    unsafe { memory.vmm.switch_pagedir(&parent) };
    assert_eq!(mmu.active_root(), parent.root_page());

    let free_before_clone = memory.frames.free_frames();
    let child = memory.clone_page_directory().unwrap();

    // Directory, one user table and one user page.
    assert_eq!(memory.frames.free_frames(), free_before_clone - 3);

    let physmap = VirtualAddress::new(0xC000_0000);
    assert_eq!(
        child.walk(physmap).pde.next_table(),
        kernel.walk(physmap).pde.next_table()
    );
    assert_ne!(child.walk(va).pde.next_table(), parent.walk(va).pde.next_table());
    assert!(child.walk(va).pde.flags().user_access());

    let child_frame = child.get_phys_frame(va).unwrap();
    assert_ne!(child_frame, parent_frame);
    assert_eq!(phys.read_u32(child_frame.base()), 0xDEAD_BEEF);

    phys.write_u32(child_frame.base(), 0x1234_5678);
    assert_eq!(phys.read_u32(parent_frame.base()), 0xDEAD_BEEF);

    memory.destroy_address_space(child).unwrap();
    assert_eq!(memory.frames.free_frames(), free_before_clone);
}

#[test]
fn clone_cannot_free_the_kernel_heap_window() {
    let phys = TestPhys::new();
    let mmu = FakeMmu::default();
    let regions = regions();
    let mut memory = bring_up(&phys, &mmu, &regions);
    let kernel = memory.vmm.kernel_space();
    let heap = VirtualAddress::new(0xF000_0000);

    let config = HeapConfig {
        size: 0x4000,
        max_size: 0,
        ..HeapConfig::kernel()
    };
    map_heap_region(&kernel, &mut memory.frames, &config).unwrap();
    let table = kernel.walk(heap).pde.next_table();
    assert!(table.is_some());

    let process = memory.clone_page_directory().unwrap();
    let free = memory.frames.free_frames();
    assert_eq!(memory.free_region(&process, heap, 0x4000), 0);

    assert_eq!(memory.frames.free_frames(), free);
    assert_eq!(kernel.walk(heap).pde.next_table(), table);
    assert_eq!(process.walk(heap).pde.next_table(), table);
    assert!(kernel.get_phys_frame(heap + 0x3000).is_some());
    assert!(mmu.flushed().is_empty());

    // The kernel itself gives the pages back but keeps the table for its clones.
    assert_eq!(memory.free_region(&kernel, heap, 0x4000), 4);
    assert_eq!(memory.frames.free_frames(), free + 4);
    assert_eq!(kernel.walk(heap).pde.next_table(), table);
    assert_eq!(process.walk(heap).pde.next_table(), table);
}

#[test]
fn in_use_directories_are_not_destroyed() {
    let phys = TestPhys::new();
    let mmu = FakeMmu::default();
    let regions = regions();
    let mut memory = bring_up(&phys, &mmu, &regions);
    let kernel_root = memory.vmm.kernel_space().root_page();
    let free = memory.frames.free_frames();

    let result = memory.destroy_address_space(AddressSpace::from_root(&phys, kernel_root));
    assert_eq!(result, Err(VmmError::InUse(kernel_root)));

    let space = memory.create_address_space().unwrap();
    let root = space.root_page();
    unsafe { memory.vmm.switch_pagedir(&space) };
    let result = memory.destroy_address_space(space);
    assert_eq!(result, Err(VmmError::InUse(root)));
    assert_eq!(memory.frames.free_frames(), free - 1);
}

#[test]
fn failed_clone_releases_partial_copy() {
    let phys = TestPhys::new();
    let mmu = FakeMmu::default();
    let regions = regions();
    let mut memory = bring_up(&phys, &mmu, &regions);
    let va = VirtualAddress::new(USER_VA);

    let parent = memory.clone_page_directory().unwrap();
    memory
        .alloc_region(&parent, va, 8 * 4096, PageEntryBits::user_rw())
        .unwrap();
    unsafe { memory.vmm.switch_pagedir(&parent) };

    let mut hoard = Vec::new();
    while memory.frames.free_frames() > 5 {
        hoard.push(memory.frames.frame_alloc().unwrap());
    }

    let result = memory.clone_page_directory();
    assert!(matches!(
        result,
        Err(VmmError::AddressSpace(AddressSpaceError::OutOfMemory))
    ));
    assert_eq!(memory.frames.free_frames(), 5);
}

#[test]
fn read_active_pagedir_follows_the_mmu() {
    let phys = TestPhys::new();
    let mmu = FakeMmu::default();
    let regions = regions();
    let mut memory = bring_up(&phys, &mmu, &regions);

    let space = memory.create_address_space().unwrap();
    mmu.force_root(space.root_page());
    assert_eq!(memory.vmm.read_active_pagedir().root_page(), space.root_page());
    assert_eq!(memory.vmm.current_space().root_page(), space.root_page());
}

#[test]
fn heap_window_is_backed_with_requested_privilege() {
    let phys = TestPhys::new();
    let mmu = FakeMmu::default();
    let regions = regions();
    let mut memory = bring_up(&phys, &mmu, &regions);
    let kernel = memory.vmm.kernel_space();
    let free = memory.frames.free_frames();

    let layout = map_heap_region(&kernel, &mut memory.frames, &HeapConfig::kernel()).unwrap();
    assert_eq!(layout.start, 0xF000_0000);
    assert_eq!(layout.managed_size, 0x40_0000);
    assert_eq!(layout.max_order, 22);
    // 1024 pages and one table.
    assert_eq!(memory.frames.free_frames(), free - 1025);

    let walk = kernel.walk(VirtualAddress::new(0xF03F_F000));
    let pte = walk.pte.unwrap();
    assert!(pte.is_present() && pte.flags().writable());
    assert!(!pte.flags().user_access());

    let user = HeapConfig {
        start: VirtualAddress::new(0x8000_0800),
        size: 0x5000,
        max_size: 0,
        supervisor: false,
        readonly: false,
    };
    let layout = map_heap_region(&kernel, &mut memory.frames, &user).unwrap();
    assert_eq!(layout.start, 0x8000_1000);
    assert_eq!(layout.managed_size, 0x4000);
    let walk = kernel.walk(VirtualAddress::new(0x8000_1000));
    assert!(walk.pde.flags().user_access());
    assert!(walk.pte.unwrap().flags().user_access());
    assert_eq!(kernel.get_phys_frame(VirtualAddress::new(0x8000_5000)), None);
}

#[test]
fn page_fault_report_walks_both_levels() {
    let phys = TestPhys::new();
    let mmu = FakeMmu::default();
    let regions = regions();
    let memory = bring_up(&phys, &mmu, &regions);
    let kernel = memory.vmm.kernel_space();

    let unmapped = report_page_fault(
        &kernel,
        VirtualAddress::new(USER_VA + 0x10),
        PageFaultError::from_bits(0b110),
    );
    assert!(!unmapped.walk.pde.is_present());
    assert_eq!(unmapped.walk.pte, None);
    assert_eq!(unmapped.physmap_alias, None);
    assert!(unmapped.error.user() && unmapped.error.write());

    let physmap = report_page_fault(
        &kernel,
        VirtualAddress::new(0xC020_0010),
        PageFaultError::from_bits(0b011),
    );
    assert_eq!(physmap.physmap_alias, Some(PhysicalAddress::new(0x20_0010)));
    assert_eq!(physmap.walk.frame(), Some(page(0x200)));
}
