//! # Kernel Boot Information
//!
//! The boot sector queries the BIOS (`int 0x15`, functions `0xE801` and
//! `0xE820`) and leaves the results at fixed low physical addresses before
//! jumping to the kernel. The layouts below mirror what it writes.

use crate::memory::{MAX_MEMORY_MAP_ENTRIES, MEM_MAP_ENTRY_COUNT_LOC, MEM_MAP_LOC, MEM_SIZE_LOC, PAGE_SIZE};
use kernel_memory_addresses::{PhysicalAddress, Size4K};

/// Memory size as reported by `int 0x15, eax=0xE801`.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct E801MemorySize {
    /// Number of 1 KiB blocks between 1 MiB and 16 MiB.
    pub low_kib: u32,
    /// Number of 64 KiB blocks above 16 MiB.
    pub high_64k: u32,
}

impl E801MemorySize {
    /// Total memory in KiB, including the first MiB that E801 does not report.
    ///
    /// ```rust
    /// # use kernel_info::boot::E801MemorySize;
    /// let size = E801MemorySize { low_kib: 15 * 1024, high_64k: 16 };
    /// assert_eq!(size.total_kib(), 17 * 1024);
    /// ```
    #[inline]
    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn total_kib(&self) -> u64 {
        1024 + self.low_kib as u64 + self.high_64k as u64 * 64
    }

    /// Number of whole page frames described by [`total_kib`](Self::total_kib),
    /// capped to what a 32-bit physical address space can hold.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_lossless)]
    pub const fn total_frames(&self) -> u32 {
        let frames = self.total_kib() * 1024 / PAGE_SIZE as u64;
        if frames > MAX_FRAMES { MAX_FRAMES as u32 } else { frames as u32 }
    }
}

#[allow(clippy::cast_lossless)]
const MAX_FRAMES: u64 = (1u64 << 32) / PAGE_SIZE as u64;

/// Region type of an [`E820Entry`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MemoryRegionType {
    Usable,
    Reserved,
    AcpiReclaimable,
    AcpiNvs,
    BadMemory,
    Unknown(u32),
}

impl From<u32> for MemoryRegionType {
    fn from(value: u32) -> Self {
        match value {
            1 => Self::Usable,
            2 => Self::Reserved,
            3 => Self::AcpiReclaimable,
            4 => Self::AcpiNvs,
            5 => Self::BadMemory,
            other => Self::Unknown(other),
        }
    }
}

/// One entry of the BIOS `0xE820` memory map (24 bytes, ACPI 3.0 layout).
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct E820Entry {
    pub base_low: u32,
    pub base_high: u32,
    pub length_low: u32,
    pub length_high: u32,
    pub region_type: u32,
    pub acpi: u32,
}

const _: () = assert!(size_of::<E820Entry>() == 24);

impl E820Entry {
    /// Builds an entry from 64-bit base and length values.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(base: u64, length: u64, region_type: MemoryRegionType) -> Self {
        let region_type = match region_type {
            MemoryRegionType::Usable => 1,
            MemoryRegionType::Reserved => 2,
            MemoryRegionType::AcpiReclaimable => 3,
            MemoryRegionType::AcpiNvs => 4,
            MemoryRegionType::BadMemory => 5,
            MemoryRegionType::Unknown(other) => other,
        };
        Self {
            base_low: base as u32,
            base_high: (base >> 32) as u32,
            length_low: length as u32,
            length_high: (length >> 32) as u32,
            region_type,
            acpi: 1,
        }
    }

    #[inline]
    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn base(&self) -> u64 {
        ((self.base_high as u64) << 32) | self.base_low as u64
    }

    #[inline]
    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn length(&self) -> u64 {
        ((self.length_high as u64) << 32) | self.length_low as u64
    }

    /// Exclusive end of the region, saturating at `u64::MAX`.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base().saturating_add(self.length())
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> MemoryRegionType {
        MemoryRegionType::from(self.region_type)
    }

    #[inline]
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.kind() == MemoryRegionType::Usable
    }

    /// Frame numbers `[first, last)` of all frames that lie entirely inside
    /// this region. Partial frames at either end are excluded.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_lossless)]
    pub const fn covered_frames(&self) -> (u32, u32) {
        let page = PAGE_SIZE as u64;
        let first = self.base().div_ceil(page);
        let last = self.end() / page;
        let first = if first > MAX_FRAMES { MAX_FRAMES } else { first };
        let last = if last > MAX_FRAMES { MAX_FRAMES } else { last };
        if last <= first {
            (first as u32, first as u32)
        } else {
            (first as u32, last as u32)
        }
    }
}

/// Physical extent of the loaded kernel image, as given by linker symbols.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct KernelImage {
    pub start: PhysicalAddress,
    pub end: PhysicalAddress,
}

impl KernelImage {
    #[must_use]
    pub const fn new(start: PhysicalAddress, end: PhysicalAddress) -> Self {
        Self { start, end }
    }

    /// Frame numbers `[first, last)` touched by the image.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn frames(&self) -> (u32, u32) {
        let first = self.start.page::<Size4K>().frame_number();
        let last = match self.end.align_up::<Size4K>() {
            Some(end) => end.page::<Size4K>().frame_number(),
            None => (MAX_FRAMES - 1) as u32,
        };
        (first, last)
    }
}

/// Everything the frame allocator learns from firmware.
#[derive(Debug, Copy, Clone)]
pub struct BootMemory<'a> {
    pub size: E801MemorySize,
    pub regions: &'a [E820Entry],
}

impl<'a> BootMemory<'a> {
    #[must_use]
    pub const fn new(size: E801MemorySize, regions: &'a [E820Entry]) -> Self {
        Self { size, regions }
    }

    /// Usable regions of the memory map, in firmware order.
    pub fn usable(&self) -> impl Iterator<Item = &'a E820Entry> + 'a {
        self.regions.iter().filter(|r| r.is_usable())
    }
}

impl BootMemory<'static> {
    /// Reads the boot sector's hand-off from [`MEM_SIZE_LOC`],
    /// [`MEM_MAP_ENTRY_COUNT_LOC`] and [`MEM_MAP_LOC`].
    ///
    /// The entry count is clamped to [`MAX_MEMORY_MAP_ENTRIES`].
    ///
    /// # Safety
    /// The low physical memory holding the hand-off must be identity mapped
    /// and must not have been reused since the boot sector wrote it.
    #[allow(unsafe_code)]
    #[must_use]
    pub unsafe fn from_fixed_locations() -> Self {
        let size_ptr = MEM_SIZE_LOC as usize as *const E801MemorySize;
        let count_ptr = MEM_MAP_ENTRY_COUNT_LOC as usize as *const u32;
        let map_ptr = MEM_MAP_LOC as usize as *const E820Entry;

        // SAFETY: the caller guarantees the boot data is mapped and intact.
        unsafe {
            let size = size_ptr.read_unaligned();
            let count = (count_ptr.read_unaligned() as usize).min(MAX_MEMORY_MAP_ENTRIES);
            let regions = core::slice::from_raw_parts(map_ptr, count);
            Self { size, regions }
        }
    }
}
