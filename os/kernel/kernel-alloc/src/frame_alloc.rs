//! # Bitmap Physical Frame Allocator
//!
//! One bit per 4 KiB frame of installed memory; a set bit means *used*.
//!
//! ```text
//!   word 0                            word 1
//!   bit 0 ... bit 31                  bit 0 ... bit 31
//!   ┌─┬─┬─┬─┬─┬─┬─┬─────────────────┬─┬─┬─┬─┬─────────┐
//!   │1│1│1│1│0│0│1│       ...       │0│0│0│1│   ...   │
//!   └─┴─┴─┴─┴─┴─┴─┴─────────────────┴─┴─┴─┴─┴─────────┘
//!   frame n  =  word n / 32, bit n % 32
//! ```
//!
//! The bitmap itself lives in physical memory right behind the kernel image
//! (page aligned) and is reached through the [`PhysMapper`].
//!
//! ## Initialization
//! 1. Every frame starts out used.
//! 2. Frames lying entirely inside a usable E820 region are freed.
//! 3. Low memory below 640 KiB, the kernel image, the bitmap and frame 0 are
//!    reserved again.
//! 4. Frames at or above `PHYSMAP_LIMIT` are reserved for good: the physmap
//!    cannot reach them, so they can never hold page tables or page copies.
//!
//! ## Protected Frames
//! [`frame_free`](BitmapFrameAlloc::frame_free) never releases frame 0,
//! anything below 1 MiB, the kernel image, the bitmap or memory beyond the
//! physmap; such calls are logged and ignored.

use kernel_info::boot::{BootMemory, KernelImage};
use kernel_info::memory::{LOW_MEMORY_END, PAGE_SIZE, PHYSMAP_LIMIT, RESERVED_LOW_END};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};
use kernel_vmem::{FrameAlloc, Outcome, PhysMapper};
use log::{debug, info, trace, warn};

const BITS_PER_WORD: u32 = u32::BITS;

/// First frame the physmap cannot reach.
const PHYSMAP_FRAMES: u32 = PHYSMAP_LIMIT / PAGE_SIZE;

/// Hard failures of [`BitmapFrameAlloc::init`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameAllocError {
    /// The firmware reports too little memory to run the kernel at all.
    #[error("implausible memory size: {0} frames")]
    ImplausibleMemorySize(u32),
    /// The bitmap would extend past the end of installed memory.
    #[error("frame bitmap at {0} does not fit into memory")]
    BitmapDoesNotFit(PhysicalAddress),
}

/// Why a [`BitmapFrameAlloc::frame_free`] did nothing.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FreeRejection {
    NullAddress,
    Unaligned,
    OutOfRange,
    FrameZero,
    LowMemory,
    KernelImage,
    Bitmap,
    /// At or above `PHYSMAP_LIMIT`.
    BeyondPhysmap,
    AlreadyFree,
}

/// Bitmap frame allocator over all installed memory.
pub struct BitmapFrameAlloc<'b> {
    bitmap: &'b mut [u32],
    total_frames: u32,
    free_frames: u32,
    /// Frame numbers `[first, last)` of the kernel image.
    kernel_frames: (u32, u32),
    /// Frame numbers `[first, last)` holding the bitmap.
    bitmap_frames: (u32, u32),
}

impl<'b> BitmapFrameAlloc<'b> {
    /// Number of `u32` words needed to track `frames` frames.
    #[inline]
    #[must_use]
    pub const fn bitmap_words(frames: u32) -> usize {
        frames.div_ceil(BITS_PER_WORD) as usize
    }

    /// Physical location of the bitmap for a given kernel image.
    #[inline]
    #[must_use]
    pub const fn bitmap_base(image: &KernelImage) -> Option<PhysicalAddress> {
        image.end.align_up::<Size4K>()
    }

    /// Set up the allocator from the firmware memory description.
    ///
    /// The bitmap is placed at the first page boundary behind the kernel image.
    ///
    /// # Errors
    /// - [`FrameAllocError::ImplausibleMemorySize`] if no memory above 1 MiB is reported.
    /// - [`FrameAllocError::BitmapDoesNotFit`] if the bitmap would run past the end of memory.
    ///
    /// # Safety
    /// Physical memory from the end of the kernel image up to the end of the
    /// bitmap must be reachable through `mapper` as one contiguous, writable
    /// range, and must not be in use by anything else.
    pub unsafe fn init<M: PhysMapper>(
        boot: &BootMemory<'_>,
        image: KernelImage,
        mapper: &M,
    ) -> Result<Self, FrameAllocError> {
        let total = boot.size.total_frames();
        Self::check_total(total)?;

        let base = Self::bitmap_base(&image).ok_or(FrameAllocError::BitmapDoesNotFit(image.end))?;
        let words = Self::bitmap_words(total);
        Self::bitmap_extent(base, words, total)?;

        // SAFETY: the caller guarantees the bitmap range is mapped and unused.
        let bitmap = unsafe {
            let first: &mut u32 = mapper.phys_to_mut(base);
            core::slice::from_raw_parts_mut(core::ptr::from_mut(first), words)
        };
        Self::with_bitmap(boot, image, bitmap, base)
    }

    /// Set up the allocator over a caller-provided bitmap at `bitmap_base`.
    ///
    /// `bitmap` must hold at least [`bitmap_words`](Self::bitmap_words) words
    /// for the reported memory size; excess words are ignored.
    ///
    /// # Errors
    /// As for [`init`](Self::init).
    pub fn with_bitmap(
        boot: &BootMemory<'_>,
        image: KernelImage,
        bitmap: &'b mut [u32],
        bitmap_base: PhysicalAddress,
    ) -> Result<Self, FrameAllocError> {
        let total = boot.size.total_frames();
        Self::check_total(total)?;

        let words = Self::bitmap_words(total);
        let bitmap_frames = Self::bitmap_extent(bitmap_base, words, total)?;
        let Some(bitmap) = bitmap.get_mut(..words) else {
            return Err(FrameAllocError::BitmapDoesNotFit(bitmap_base));
        };
        bitmap.fill(u32::MAX);

        let mut pfa = Self {
            bitmap,
            total_frames: total,
            free_frames: 0,
            kernel_frames: image.frames(),
            bitmap_frames,
        };

        for region in boot.usable() {
            let (first, last) = region.covered_frames();
            let last = last.min(total);
            for frame in first..last {
                pfa.mark_free(frame);
            }
            trace!(
                "usable region {:#x}..{:#x}: frames {first}..{last}",
                region.base(),
                region.end()
            );
        }

        let reserved = pfa.reserve_frames(0, LOW_MEMORY_END / PAGE_SIZE)
            + pfa.reserve_frames(pfa.kernel_frames.0, pfa.kernel_frames.1)
            + pfa.reserve_frames(pfa.bitmap_frames.0, pfa.bitmap_frames.1)
            + pfa.reserve_frames(0, 1);
        debug!("reserved {reserved} frames for low memory, kernel image and bitmap");

        let unreachable = pfa.reserve_frames(PHYSMAP_FRAMES, total);
        if unreachable > 0 {
            warn!("{unreachable} usable frames above {PHYSMAP_LIMIT:#x} are outside the physmap and stay reserved");
        }

        pfa.log_summary();
        Ok(pfa)
    }

    fn check_total(total: u32) -> Result<(), FrameAllocError> {
        if total <= RESERVED_LOW_END / PAGE_SIZE {
            warn!("implausible memory size: {total} frames");
            return Err(FrameAllocError::ImplausibleMemorySize(total));
        }
        Ok(())
    }

    /// Frame range `[first, last)` occupied by a bitmap of `words` words at `base`.
    fn bitmap_extent(
        base: PhysicalAddress,
        words: usize,
        total: u32,
    ) -> Result<(u32, u32), FrameAllocError> {
        let bytes = u64::try_from(words * size_of::<u32>())
            .map_err(|_| FrameAllocError::BitmapDoesNotFit(base))?;
        let end = u64::from(base.as_u32()) + bytes;
        let first = base.page::<Size4K>().frame_number();
        let last = end.div_ceil(u64::from(PAGE_SIZE));
        if last > u64::from(total) {
            warn!("frame bitmap at {base} ({bytes} bytes) runs past {total} frames");
            return Err(FrameAllocError::BitmapDoesNotFit(base));
        }
        // `last <= total`, which is a `u32`.
        Ok((first, u32::try_from(last).unwrap_or(total)))
    }

    /// Hand out the lowest free frame.
    ///
    /// Returns `None` once every frame is used.
    pub fn frame_alloc(&mut self) -> Option<PhysicalAddress> {
        let (word_idx, word) = self
            .bitmap
            .iter()
            .enumerate()
            .find(|&(_, &w)| w != u32::MAX)?;
        let frame = u32::try_from(word_idx).ok()? * BITS_PER_WORD + (!word).trailing_zeros();
        if frame >= self.total_frames {
            debug!("frame_alloc: out of physical frames");
            return None;
        }
        self.mark_used(frame);
        Some(Self::frame_address(frame))
    }

    /// Return a frame to the pool.
    ///
    /// Addresses that are null, unaligned, out of range, protected or already
    /// free are logged and ignored.
    pub fn frame_free(&mut self, pa: PhysicalAddress) -> Outcome<FreeRejection> {
        if let Err(reason) = self.check_free(pa) {
            match reason {
                FreeRejection::NullAddress | FreeRejection::AlreadyFree => {
                    debug!("frame_free({pa}) ignored: {reason:?}");
                }
                _ => warn!("frame_free({pa}) ignored: {reason:?}"),
            }
            return Outcome::Skipped(reason);
        }
        self.mark_free(pa.page::<Size4K>().frame_number());
        Outcome::Applied
    }

    fn check_free(&self, pa: PhysicalAddress) -> Result<(), FreeRejection> {
        if pa.is_null() {
            return Err(FreeRejection::NullAddress);
        }
        if !pa.is_aligned::<Size4K>() {
            return Err(FreeRejection::Unaligned);
        }
        let frame = pa.page::<Size4K>().frame_number();
        if frame >= self.total_frames {
            return Err(FreeRejection::OutOfRange);
        }
        self.check_protected(frame)?;
        if !self.is_used(frame) {
            return Err(FreeRejection::AlreadyFree);
        }
        Ok(())
    }

    fn check_protected(&self, frame: u32) -> Result<(), FreeRejection> {
        let (kernel_first, kernel_last) = self.kernel_frames;
        let (bitmap_first, bitmap_last) = self.bitmap_frames;
        if frame == 0 {
            Err(FreeRejection::FrameZero)
        } else if frame < RESERVED_LOW_END / PAGE_SIZE {
            Err(FreeRejection::LowMemory)
        } else if (kernel_first..kernel_last).contains(&frame) {
            Err(FreeRejection::KernelImage)
        } else if (bitmap_first..bitmap_last).contains(&frame) {
            Err(FreeRejection::Bitmap)
        } else if frame >= PHYSMAP_FRAMES {
            Err(FreeRejection::BeyondPhysmap)
        } else {
            Ok(())
        }
    }

    /// Mark every frame touched by `[base, base + size)` as used.
    ///
    /// Returns the number of frames that changed state.
    pub fn reserve_range(&mut self, base: PhysicalAddress, size: u32) -> u32 {
        let start = u64::from(base.as_u32());
        let end = start + u64::from(size);
        let first = start / u64::from(PAGE_SIZE);
        let last = end.div_ceil(u64::from(PAGE_SIZE));
        let (first, last) = self.clip(first, last);
        self.reserve_frames(first, last)
    }

    /// Mark every frame lying entirely inside `[base, base + size)` as free.
    ///
    /// Protected frames stay used. Returns the number of frames that changed state.
    pub fn release_range(&mut self, base: PhysicalAddress, size: u32) -> u32 {
        let start = u64::from(base.as_u32());
        let end = start + u64::from(size);
        let first = start.div_ceil(u64::from(PAGE_SIZE));
        let last = end / u64::from(PAGE_SIZE);
        let (first, last) = self.clip(first, last);

        let mut changed = 0;
        for frame in first..last {
            if self.is_used(frame) && self.check_protected(frame).is_ok() {
                self.mark_free(frame);
                changed += 1;
            }
        }
        changed
    }

    fn clip(&self, first: u64, last: u64) -> (u32, u32) {
        let total = u64::from(self.total_frames);
        let first = u32::try_from(first.min(total)).unwrap_or(self.total_frames);
        let last = u32::try_from(last.min(total)).unwrap_or(self.total_frames);
        (first, last)
    }

    fn reserve_frames(&mut self, first: u32, last: u32) -> u32 {
        let mut changed = 0;
        for frame in first..last.min(self.total_frames) {
            if !self.is_used(frame) {
                self.mark_used(frame);
                changed += 1;
            }
        }
        changed
    }

    /// `true` if `frame` is allocated, reserved or beyond installed memory.
    #[must_use]
    pub fn is_used(&self, frame: u32) -> bool {
        if frame >= self.total_frames {
            return true;
        }
        let (word, bit) = Self::locate(frame);
        self.bitmap[word] & (1 << bit) != 0
    }

    fn mark_used(&mut self, frame: u32) {
        let (word, bit) = Self::locate(frame);
        if self.bitmap[word] & (1 << bit) == 0 {
            self.bitmap[word] |= 1 << bit;
            self.free_frames -= 1;
        }
    }

    fn mark_free(&mut self, frame: u32) {
        let (word, bit) = Self::locate(frame);
        if self.bitmap[word] & (1 << bit) != 0 {
            self.bitmap[word] &= !(1 << bit);
            self.free_frames += 1;
        }
    }

    #[inline]
    const fn locate(frame: u32) -> (usize, u32) {
        ((frame / BITS_PER_WORD) as usize, frame % BITS_PER_WORD)
    }

    #[inline]
    const fn frame_address(frame: u32) -> PhysicalAddress {
        PhysicalPage::<Size4K>::from_frame_number(frame).base()
    }

    #[inline]
    #[must_use]
    pub const fn total_frames(&self) -> u32 {
        self.total_frames
    }

    #[inline]
    #[must_use]
    pub const fn free_frames(&self) -> u32 {
        self.free_frames
    }

    #[inline]
    #[must_use]
    pub const fn used_frames(&self) -> u32 {
        self.total_frames - self.free_frames
    }

    /// Physical byte range `[start, end)` of the frames holding the bitmap.
    #[must_use]
    pub const fn bitmap_range(&self) -> (PhysicalAddress, PhysicalAddress) {
        (
            Self::frame_address(self.bitmap_frames.0),
            Self::frame_address(self.bitmap_frames.1),
        )
    }

    pub fn log_summary(&self) {
        let (bitmap_start, bitmap_end) = self.bitmap_range();
        info!(
            "PFA: {} frames ({} KiB), {} used, {} free; bitmap {bitmap_start}..{bitmap_end}",
            self.total_frames,
            u64::from(self.total_frames) * u64::from(PAGE_SIZE) / 1024,
            self.used_frames(),
            self.free_frames
        );
    }
}

impl FrameAlloc for BitmapFrameAlloc<'_> {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        self.frame_alloc().map(PhysicalPage::from_addr)
    }

    fn free_4k(&mut self, page: PhysicalPage<Size4K>) {
        // Rejections are logged by `frame_free`.
        let _ = self.frame_free(page.base());
    }
}
