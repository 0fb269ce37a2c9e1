//! # Typed i386 Control Registers
//!
//! Just the registers the memory-management core touches:
//!
//! | Register | Role |
//! |----------|------|
//! | [`Cr3`](cr3::Cr3) | physical base of the active page directory |
//! | [`Cr2`](cr2::Cr2) | linear address that caused the last page fault |
//! | [`invlpg`](tlb::invlpg) | drops a single translation from the TLB |
//!
//! The bit layouts are plain data and usable everywhere; the accessors that
//! execute privileged instructions only exist with the `asm` feature on an
//! `x86` target.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "cr2")]
pub mod cr2;

#[cfg(feature = "cr3")]
pub mod cr3;

#[cfg(feature = "tlb")]
pub mod tlb;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn store_unsafe(self);
}
