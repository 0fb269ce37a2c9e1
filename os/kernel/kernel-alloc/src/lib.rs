//! # Kernel Memory Allocation and Virtual Memory Management
//!
//! The memory core of the kernel: physical frames, page directories and the
//! kernel heap, each built on the one below.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Kernel Heap (KHEAP)                 │
//! │    • Buddy allocator, orders 5..32                  │
//! │    • Headers with magic, coalescing on free         │
//! │    • kmalloc / kfree / krealloc, GlobalAlloc        │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ alloc_region (once, at setup)
//! ┌─────────────────▼───────────────────────────────────┐
//! │           Virtual Memory Manager (VMM)              │
//! │    • Kernel directory: identity 1 MiB + physmap     │
//! │    • Address-space creation and copy-on-fork clone  │
//! │    • Page-fault reporting                           │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ FrameAlloc
//! ┌─────────────────▼───────────────────────────────────┐
//! │         Physical Frame Allocator (PFA)              │
//! │    • One bit per 4 KiB frame                        │
//! │    • Seeded from the E820 map                       │
//! │    • Lowest-address-first allocation                │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Physical Frame Allocator ([`frame_alloc`])
//! * **Bitmap**: placed right behind the kernel image, reached through the [`PhysMapper`](kernel_vmem::PhysMapper)
//! * **Reserved frames**: frame 0, low memory, the kernel image and the bitmap never leave the allocator
//! * **Idempotent free**: double frees and foreign addresses are reported as skipped, never counted
//!
//! ### Physical Mapper ([`phys_mapper`])
//! Translates between physical addresses and their alias in the physmap window.
//!
//! ### Virtual Memory Manager ([`vmm`], [`page_fault`])
//! * **Kernel directory**: built at init, shared by reference with every clone
//! * **Cloning**: non-kernel tables are deep-copied, content included
//! * **Faults**: logged with a decoded error code and the table walk, then the CPU halts
//!
//! ### Kernel Heap ([`buddy`], [`kheap`])
//! * **Buddy heap**: power-of-two blocks with an 8-byte header in front of every allocation
//! * **Free lists**: offset-linked nodes stored inside the free blocks
//! * **Kernel heap**: one [`BuddyHeap`](buddy::BuddyHeap) behind an interrupt-masking spin lock
//!
//! ## Bring-up
//!
//! ```text
//! BootMemory ──► BitmapFrameAlloc::init ──► Vmm::init ──► KernelMemory::create_heap
//!                                               │                │
//!                                          CR3 switch     install_kernel_heap
//! ```
//!
//! ```rust,ignore
//! use kernel_alloc::context::KernelMemory;
//! use kernel_alloc::hw::HardwareMmu;
//! use kernel_alloc::kheap::{install_kernel_heap, HeapConfig};
//! use kernel_alloc::phys_mapper::PhysmapMapper;
//! use kernel_info::boot::{BootMemory, KernelImage};
//! use kernel_memory_addresses::PhysicalAddress;
//!
//! # fn boot(kernel_start: u32, kernel_end: u32) -> Result<(), Box<dyn core::error::Error>> {
//! let boot = unsafe { BootMemory::from_fixed_locations() };
//! let image = KernelImage::new(PhysicalAddress::new(kernel_start), PhysicalAddress::new(kernel_end));
//! let mmu = unsafe { HardwareMmu::new() };
//!
//! let mut memory = unsafe { KernelMemory::bring_up(&boot, image, &PhysmapMapper, &mmu) }?;
//! let heap = unsafe { memory.create_heap(HeapConfig::kernel()) }?;
//! install_kernel_heap(heap)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency
//!
//! Nothing here blocks or sleeps. The PFA and the VMM are plain values owned
//! by [`KernelMemory`](context::KernelMemory); callers that reach them from
//! interrupt context wrap them in a [`kernel_sync::IrqSpinLock`], as the
//! kernel heap does.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod buddy;
pub mod context;
pub mod frame_alloc;
#[cfg(target_arch = "x86")]
pub mod hw;
pub mod kheap;
pub mod page_fault;
pub mod phys_mapper;
pub mod vmm;
