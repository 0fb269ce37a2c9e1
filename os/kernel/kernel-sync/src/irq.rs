//! Interrupt masking for i386.
//!
//! Memory-management entry points are not reentrant: an interrupt handler
//! that allocates while the interrupted code holds the heap lock would spin
//! forever. [`IrqSpinLock`] closes that window by keeping `IF` clear for as
//! long as the lock is held.
//!
//! On anything but an `x86` target the interrupt flag is modelled as always
//! clear so that host tests exercise the locking logic only.

use crate::{SpinLock, SpinLockGuard};
use core::ops::{Deref, DerefMut};

/// `EFLAGS.IF`
const INTERRUPT_FLAG: u32 = 1 << 9;

/// Returns the current `EFLAGS` value (via `pushfd/pop`).
#[cfg(target_arch = "x86")]
#[inline]
#[must_use]
pub fn eflags() -> u32 {
    let r: u32;
    unsafe { core::arch::asm!("pushfd; pop {}", out(reg) r, options(nomem, preserves_flags)) }
    r
}

#[cfg(not(target_arch = "x86"))]
#[inline]
#[must_use]
pub const fn eflags() -> u32 {
    0
}

/// Disables maskable interrupts (`cli`).
#[inline]
pub fn disable_interrupts() {
    #[cfg(target_arch = "x86")]
    unsafe {
        core::arch::asm!("cli", options(nomem, nostack, preserves_flags));
    }
}

/// Enables maskable interrupts (`sti`).
#[inline]
pub fn enable_interrupts() {
    #[cfg(target_arch = "x86")]
    unsafe {
        core::arch::asm!("sti", options(nomem, nostack, preserves_flags));
    }
}

#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    eflags() & INTERRUPT_FLAG != 0
}

/// Stops the CPU for good: interrupts off, then `hlt` forever.
pub fn halt() -> ! {
    disable_interrupts();
    loop {
        #[cfg(target_arch = "x86")]
        unsafe {
            core::arch::asm!("hlt", options(nomem, nostack, preserves_flags));
        }
        #[cfg(not(target_arch = "x86"))]
        core::hint::spin_loop();
    }
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// Only re-enables interrupts if they were enabled when the guard was made,
/// so guards nest.
///
/// ```no_run
/// use kernel_sync::irq::{interrupts_enabled, IrqGuard};
///
/// let before = interrupts_enabled();
/// {
///     let _g = IrqGuard::new();
///     assert!(!interrupts_enabled());
/// }
/// assert_eq!(interrupts_enabled(), before);
/// ```
pub struct IrqGuard {
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let were_enabled = interrupts_enabled();
        if were_enabled {
            disable_interrupts();
        }
        Self { were_enabled }
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            enable_interrupts();
        }
    }
}

/// A [`SpinLock`] that also masks interrupts while held.
pub struct IrqSpinLock<T> {
    inner: SpinLock<T>,
}

impl<T> IrqSpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: SpinLock::new(value),
        }
    }

    /// Disables interrupts, then spins for the lock.
    #[inline]
    pub fn lock(&self) -> IrqSpinLockGuard<'_, T> {
        let irq = IrqGuard::new();
        let guard = self.inner.lock();
        IrqSpinLockGuard { guard, _irq: irq }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<IrqSpinLockGuard<'_, T>> {
        let irq = IrqGuard::new();
        let guard = self.inner.try_lock()?;
        Some(IrqSpinLockGuard { guard, _irq: irq })
    }

    #[inline]
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut g = self.lock();
        f(&mut g)
    }

    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

/// Field order matters: the lock is released before interrupts come back.
pub struct IrqSpinLockGuard<'a, T> {
    guard: SpinLockGuard<'a, T>,
    _irq: IrqGuard,
}

impl<T> Deref for IrqSpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
