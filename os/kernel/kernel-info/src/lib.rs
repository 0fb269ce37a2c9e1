//! # Kernel Configuration and Boot Interface
//!
//! Memory layout constants and the firmware hand-off contract consumed by the
//! memory-management core of the i386 kernel.
//!
//! ## Architecture
//!
//! ### Boot Information ([`boot`])
//! * **E801 memory size**: KiB between 1 MiB and 16 MiB, 64 KiB blocks above 16 MiB
//! * **E820 memory map**: `{base, length, type, ACPI}` entries produced by the
//!   boot sector before the kernel is entered
//! * **Kernel image extent**: physical start/end of the loaded kernel, taken
//!   from linker symbols
//!
//! ### Memory Layout ([`memory`])
//! * **Identity window**: the first MiB stays mapped 1:1 for early boot code
//! * **Physical map**: every physical frame is reachable at [`PHYSMAP_BASE`](memory::PHYSMAP_BASE)` + pa`
//! * **Kernel heap**: a fixed virtual window backed on demand by the VMM
//!
//! ```text
//! Virtual Address Space Layout (32-bit):
//!
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │  Identity map (first 1 MiB)     │
//! 0x0010_0000 ├─────────────────────────────────┤
//!             │         User Space              │
//!             │                                 │
//! PHYSMAP_BASE├─────────────────────────────────┤ 0xC000_0000
//!             │   Physical memory map           │
//!             │   (kernel image lives here too) │
//! HEAP_BASE   ├─────────────────────────────────┤ 0xF000_0000
//!             │   Kernel heap                   │
//!             ├─────────────────────────────────┤
//!             │   Unused                        │
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! ## Physical Memory Layout
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │ Real-mode IVT, BDA, boot data   │  (E801/E820 at 0x3000)
//! 0x000A_0000 ├─────────────────────────────────┤
//!             │ VGA, option ROMs, BIOS          │
//! 0x0010_0000 ├─────────────────────────────────┤ (1 MiB)
//!             │ Kernel image                    │
//!             ├─────────────────────────────────┤ (page aligned)
//!             │ Frame bitmap                    │
//!             ├─────────────────────────────────┤
//!             │ Frames handed out by the PFA    │
//!             └─────────────────────────────────┘
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
