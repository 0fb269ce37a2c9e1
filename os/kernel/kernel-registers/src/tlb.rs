//! TLB maintenance.

use kernel_memory_addresses::VirtualAddress;

/// Invalidate the TLB entry for the page containing `va`.
///
/// # Safety
/// Must run in ring 0.
#[cfg(all(feature = "asm", target_arch = "x86"))]
#[inline]
pub unsafe fn invlpg(va: VirtualAddress) {
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) va.as_u32(), options(nostack, preserves_flags));
    }
}

/// Host builds have no TLB to maintain.
///
/// # Safety
/// Always safe; kept `unsafe` to match the x86 signature.
#[cfg(not(all(feature = "asm", target_arch = "x86")))]
#[inline]
pub unsafe fn invlpg(va: VirtualAddress) {
    let _ = va;
}
