//! # Memory Layout

/// Size of a page frame and of a virtual page.
pub const PAGE_SIZE: u32 = 4096;

/// Base of the physical memory map window.
/// Anything mapped at [`PHYSMAP_BASE`] + `pa` lets the kernel access physical
/// memory via a fixed offset.
pub const PHYSMAP_BASE: u32 = 0xC000_0000;

/// Largest amount of physical memory reachable through the physical map.
pub const PHYSMAP_LIMIT: u32 = KERNEL_HEAP_BASE - PHYSMAP_BASE;

/// End of the identity mapped low memory window (1 MiB).
pub const IDENTITY_MAP_END: u32 = 0x0010_0000;

/// End of conventional low memory (640 KiB); everything below is never handed out.
pub const LOW_MEMORY_END: u32 = 0x000A_0000;

/// Frames below this address are never returned to the frame allocator.
pub const RESERVED_LOW_END: u32 = IDENTITY_MAP_END;

/// Virtual base of the kernel heap.
pub const KERNEL_HEAP_BASE: u32 = 0xF000_0000;

/// Size of the kernel heap window in bytes.
pub const KERNEL_HEAP_SIZE: u32 = 0x0040_0000; // 4 MiB

/// Physical location of the E801 memory size written by the boot sector.
pub const MEM_SIZE_LOC: u32 = 0x3000;

/// Physical location of the E820 entry count.
pub const MEM_MAP_ENTRY_COUNT_LOC: u32 = 0x3008;

/// Physical location of the first E820 entry.
pub const MEM_MAP_LOC: u32 = 0x300C;

/// Upper bound on E820 entries read from the boot area.
pub const MAX_MEMORY_MAP_ENTRIES: usize = 32;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(PHYSMAP_BASE.is_multiple_of(0x40_0000));
    assert!(KERNEL_HEAP_BASE.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_HEAP_SIZE.is_power_of_two());
    assert!(KERNEL_HEAP_BASE > PHYSMAP_BASE);
    assert!(KERNEL_HEAP_BASE.checked_add(KERNEL_HEAP_SIZE).is_some());
    assert!(LOW_MEMORY_END < IDENTITY_MAP_END);
    assert!(IDENTITY_MAP_END <= PHYSMAP_BASE);
    assert!(MEM_MAP_ENTRY_COUNT_LOC > MEM_SIZE_LOC);
    assert!(MEM_MAP_LOC > MEM_MAP_ENTRY_COUNT_LOC);
};
