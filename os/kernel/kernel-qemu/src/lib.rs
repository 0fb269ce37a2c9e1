//! # QEMU Debug Console Support
//!
//! Routes kernel diagnostics to the emulator's debug console, the only output
//! channel that works before any driver is up.
//!
//! ## Output Mechanism
//! ```text
//! log::info!(..)
//!     ↓
//! QemuLogger (log::Log)
//!     ↓
//! write_record ──→ DebugConsole (fmt::Write)
//!                         ↓
//!                 outb → I/O port 0xE9
//!                         ↓
//!           -debugcon stdio / file:debug.log
//! ```
//!
//! ## Usage
//! ```rust,no_run
//! use log::{info, LevelFilter};
//!
//! kernel_qemu::logger::init(LevelFilter::Debug).expect("logger installed twice");
//! info!("kmm: 8 MiB usable");
//! ```
//!
//! Start the emulator with `-debugcon stdio` to see the output.
//!
//! ## Features
//! * `enabled` (default): port writes are compiled in for bare-metal x86
//!   targets. Without it (or on a hosted target) the sink
//!   swallows everything and the logger degrades to a level filter.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod logger;

pub use logger::QemuLogger;

#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt::{self, Write};

    /// Bochs/QEMU `isa-debugcon` port.
    pub const DEBUG_CONSOLE_PORT: u16 = 0xE9;

    /// Write a single byte to the debug console.
    #[inline]
    pub fn dbg_putc(c: u8) {
        #[cfg(all(feature = "enabled", target_os = "none", any(target_arch = "x86", target_arch = "x86_64")))]
        unsafe {
            core::arch::asm!(
                "out dx, al",
                in("dx") DEBUG_CONSOLE_PORT,
                in("al") c,
                options(nomem, nostack, preserves_flags)
            );
        }
        #[cfg(not(all(feature = "enabled", target_os = "none", any(target_arch = "x86", target_arch = "x86_64"))))]
        let _ = c;
    }

    /// `fmt::Write` adapter over [`dbg_putc`].
    pub struct DebugConsole;

    impl Write for DebugConsole {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            s.bytes().for_each(dbg_putc);
            Ok(())
        }
    }
}
