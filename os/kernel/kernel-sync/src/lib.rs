//! # Kernel synchronization primitives
//!
//! The memory core runs single-threaded with interrupts as the only source
//! of reentrancy. Every subsystem therefore keeps its state behind one
//! [`SpinLock`], or an [`IrqSpinLock`] when the state is reachable from
//! interrupt context.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin_lock;

pub use irq::{IrqGuard, IrqSpinLock, IrqSpinLockGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};
