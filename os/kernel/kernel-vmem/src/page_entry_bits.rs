use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// A single 32-bit i386 paging entry in its raw bitfield form.
///
/// Page-directory entries (PDEs) and page-table entries (PTEs) share this
/// layout; only bit 7 changes meaning between the two levels.
///
/// ### Bit layout
///
/// | Bits      | Name / Mnemonic   | Meaning |
/// |-----------|-------------------|----------|
/// | 0         | `P` (present)     | Valid entry if set |
/// | 1         | `RW`              | Writable if set |
/// | 2         | `US`              | User-mode accessible if set |
/// | 3         | `PWT`             | Write-through caching |
/// | 4         | `PCD`             | Disable caching |
/// | 5         | `A`               | Accessed |
/// | 6         | `D`               | Dirty (PTE only) |
/// | 7         | `PS` / `PAT`      | 4 MiB page in a PDE, PAT index in a PTE |
/// | 8         | `G`               | Global (PTE only) |
/// | 9–11      | AVL               | Available for OS use |
/// | 12–31     | `frame`           | Physical frame bits [31:12] |
///
/// ### Notes
/// - The frame field is only meaningful while `present` is set.
/// - The low 12 bits of the frame address are implicitly zero.
///
/// ### Example
/// ```rust
/// # use kernel_memory_addresses::PhysicalAddress;
/// # use kernel_vmem::PageEntryBits;
/// let e = PageEntryBits::kernel_rw().with_physical_address(PhysicalAddress::new(0x0018_1000));
/// assert_eq!(e.into_bits(), 0x0018_1003);
/// assert!(e.present() && e.writable() && !e.user_access());
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    ///
    /// For a user access to succeed, both the PDE and the PTE must allow it.
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU on first access.
    pub accessed: bool,

    /// Dirty (D, bit 6). Set by the CPU on first write through a PTE.
    pub dirty: bool,

    /// Page Size (PS) in a PDE; PAT in a PTE (bit 7).
    ///
    /// The kernel never creates 4 MiB pages, so this stays clear in PDEs.
    pub large_page: bool,

    /// Global (G, bit 8). Survives CR3 reloads when CR4.PGE is set.
    pub global_translation: bool,

    /// Available for OS use (bits 9..=11).
    #[bits(3)]
    pub os_available: u8,

    /// Physical frame number (bits 12..=31).
    #[bits(20)]
    frame_number: u32,
}

impl PageEntryBits {
    /// Mask selecting the frame address part of a raw entry.
    pub const FRAME_MASK: u32 = 0xFFFF_F000;

    /// Mask selecting the flag part of a raw entry.
    pub const FLAGS_MASK: u32 = 0x0000_0FFF;

    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.frame_number() << 12)
    }

    #[inline]
    #[must_use]
    pub const fn physical_page(&self) -> PhysicalPage<Size4K> {
        PhysicalPage::from_frame_number(self.frame_number())
    }

    #[inline]
    pub const fn set_physical_address(&mut self, phys: PhysicalAddress) {
        self.set_frame_number(phys.as_u32() >> 12);
    }

    #[inline]
    #[must_use]
    pub const fn with_physical_address(mut self, phys: PhysicalAddress) -> Self {
        self.set_physical_address(phys);
        self
    }

    /// The same entry with the frame field cleared, i.e. only the flags.
    #[inline]
    #[must_use]
    pub const fn flags_only(self) -> Self {
        Self::from_bits(self.into_bits() & Self::FLAGS_MASK)
    }

    /// Present, writable, supervisor only.
    #[inline]
    #[must_use]
    pub const fn kernel_rw() -> Self {
        Self::new().with_present(true).with_writable(true)
    }

    /// Present, writable, user accessible.
    #[inline]
    #[must_use]
    pub const fn user_rw() -> Self {
        Self::kernel_rw().with_user_access(true)
    }

    /// Flags for a directory entry that links a table holding `leaf` mappings.
    ///
    /// Tables are always present and writable; they become user accessible
    /// when the leaf asks for it, since the CPU checks both levels.
    #[inline]
    #[must_use]
    pub const fn table_link_for(leaf: Self) -> Self {
        Self::kernel_rw().with_user_access(leaf.user_access())
    }
}
