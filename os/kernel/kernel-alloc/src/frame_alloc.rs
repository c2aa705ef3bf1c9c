//! # Physical frame allocator
//!
//! Hands out runs of contiguous [`FRAME_SIZE`] frames from a single physical
//! range, tracked by one bit per frame. Bit `i` describes the frame at
//! `base + i * FRAME_SIZE`; the lowest free run wins.
//!
//! The bitmap storage is passed in by the caller, so the allocator itself
//! needs no memory: the kernel hands it a static `.bss` array before any
//! heap exists.
//!
//! ```rust
//! use kernel_alloc::frame_alloc::BitmapFrameAlloc;
//! use kernel_info::memory::FRAME_SIZE;
//! use kernel_memory_addresses::PhysicalAddress;
//!
//! let total = 64 * FRAME_SIZE;
//! let mut storage = [0_u8; 8];
//! let frames: BitmapFrameAlloc =
//!     BitmapFrameAlloc::new(PhysicalAddress::new(0x10_0000), total, &mut storage).unwrap();
//!
//! let pa = frames.alloc_frames(4).unwrap();
//! assert_eq!(pa, PhysicalAddress::new(0x10_0000));
//! assert_eq!(frames.stats().free, 60);
//! frames.free_frames(pa, 4).unwrap();
//! assert_eq!(frames.stats().free, 64);
//! ```

use crate::{AllocError, Bitmap};
use kernel_info::memory::FRAME_SIZE;
use kernel_memory_addresses::PhysicalAddress;
use kernel_sync::{AtomicCounter, RawLock, RawSpin, RawUnlock, SpinLock};
use log::{info, trace, warn};

/// Something that leases out runs of physical frames.
///
/// The heap grows through this trait, which keeps it testable against a
/// frame source that is not the kernel's global one.
pub trait FrameSource {
    /// Leases `count` contiguous frames and returns the first one's address.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] if no run is free, or
    /// [`AllocError::InvalidArgument`] for `count == 0`.
    fn alloc_frames(&self, count: usize) -> Result<PhysicalAddress, AllocError>;

    /// Returns a run previously leased by [`FrameSource::alloc_frames`].
    ///
    /// # Errors
    /// [`AllocError::InvalidFree`] if the run is not currently leased.
    fn free_frames(&self, base: PhysicalAddress, count: usize) -> Result<(), AllocError>;
}

/// Snapshot of frame usage.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameStats {
    pub total: usize,
    pub allocated: usize,
    pub free: usize,
}

pub struct BitmapFrameAlloc<'a, R = RawSpin> {
    base: PhysicalAddress,
    total_memory: u64,
    total_frames: usize,
    bitmap: SpinLock<Bitmap<'a>, R>,
    allocated: AtomicCounter,
}

/// Bytes of bitmap storage needed to track `total_memory`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn bitmap_bytes_for(total_memory: u64) -> usize {
    (total_memory / FRAME_SIZE).div_ceil(8) as usize
}

impl<'a, R: Default> BitmapFrameAlloc<'a, R> {
    /// Manages `total_memory` bytes starting at `base`.
    ///
    /// Memory past the last whole frame is ignored. Every frame starts free.
    ///
    /// # Errors
    /// [`AllocError::InvalidArgument`] if `base` is not frame-aligned, the
    /// range holds no whole frame or wraps the address space, or `storage`
    /// is shorter than [`bitmap_bytes_for`].
    pub fn new(
        base: PhysicalAddress,
        total_memory: u64,
        storage: &'a mut [u8],
    ) -> Result<Self, AllocError> {
        if !base.is_aligned_to(FRAME_SIZE) {
            return Err(AllocError::InvalidArgument("frame base is not frame-aligned"));
        }
        if base.checked_add(total_memory).is_none() {
            return Err(AllocError::InvalidArgument("frame range wraps the address space"));
        }

        let total_frames = usize::try_from(total_memory / FRAME_SIZE)
            .map_err(|_| AllocError::InvalidArgument("frame count overflows usize"))?;
        if total_frames == 0 {
            return Err(AllocError::InvalidArgument("no whole frame to manage"));
        }

        let bytes = bitmap_bytes_for(total_memory);
        if storage.len() < bytes {
            return Err(AllocError::InvalidArgument("frame bitmap storage too small"));
        }
        let length = isize::try_from(bytes)
            .map_err(|_| AllocError::InvalidArgument("frame bitmap length overflows isize"))?;
        let bitmap = Bitmap::with_units(storage, length, total_frames)?;

        info!(
            "frame allocator: {total_frames} frames of {FRAME_SIZE} bytes at {base}, bitmap {bytes} bytes"
        );

        Ok(Self {
            base,
            total_memory,
            total_frames,
            bitmap: SpinLock::from_raw(R::default(), bitmap),
            allocated: AtomicCounter::zero(),
        })
    }
}

impl<R> BitmapFrameAlloc<'_, R> {
    /// Managed size in bytes, as passed at construction. Needs no lock.
    #[must_use]
    pub const fn total_memory(&self) -> u64 {
        self.total_memory
    }

    #[must_use]
    pub const fn total_frames(&self) -> usize {
        self.total_frames
    }

    #[must_use]
    pub const fn frame_size(&self) -> u64 {
        FRAME_SIZE
    }

    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    /// Frames currently leased; a lock-free snapshot.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn allocated_frames(&self) -> usize {
        self.allocated.get() as usize
    }

    fn frame_index(&self, pa: PhysicalAddress) -> Option<usize> {
        if !pa.is_aligned_to(FRAME_SIZE) {
            return None;
        }
        let index = usize::try_from(pa.offset_from(self.base)? / FRAME_SIZE).ok()?;
        (index < self.total_frames).then_some(index)
    }

    const fn address_of(&self, index: usize) -> PhysicalAddress {
        PhysicalAddress::new(self.base.as_u64() + index as u64 * FRAME_SIZE)
    }
}

impl<R: RawLock + RawUnlock> BitmapFrameAlloc<'_, R> {
    /// Leases the lowest run of `count` free frames.
    ///
    /// # Errors
    /// * [`AllocError::InvalidArgument`] for `count == 0`.
    /// * [`AllocError::OutOfMemory`] if no such run exists.
    pub fn alloc_frames(&self, count: usize) -> Result<PhysicalAddress, AllocError> {
        let index = {
            let mut bitmap = self.bitmap.lock();
            let index = bitmap.alloc(count);
            if index.is_ok() {
                self.allocated.add(count as u64);
            }
            index
        };

        match index {
            Ok(index) => {
                let pa = self.address_of(index);
                trace!("alloc_frames({count}) = {pa}");
                Ok(pa)
            }
            Err(AllocError::OutOfMemory) => {
                warn!("alloc_frames({count}): no free run");
                Err(AllocError::OutOfMemory)
            }
            Err(e) => Err(e),
        }
    }

    /// # Errors
    /// [`AllocError::OutOfMemory`] if every frame is leased.
    pub fn alloc_frame(&self) -> Result<PhysicalAddress, AllocError> {
        self.alloc_frames(1)
    }

    /// Returns `count` frames starting at `pa`.
    ///
    /// Frees are checked: the run must lie inside the managed range, start on
    /// a frame boundary, and every frame in it must currently be leased. The
    /// allocator keeps no record of lease boundaries, so the run is not
    /// matched against the allocation it came from. Returning part of a lease,
    /// or frames from two adjacent leases at once, is accepted.
    ///
    /// # Errors
    /// [`AllocError::InvalidFree`] otherwise; the bitmap is left unchanged.
    pub fn free_frames(&self, pa: PhysicalAddress, count: usize) -> Result<(), AllocError> {
        let Some(index) = self.frame_index(pa) else {
            warn!("free_frames({pa}, {count}): not a managed frame");
            return Err(AllocError::InvalidFree(pa));
        };

        let mut bitmap = self.bitmap.lock();
        if count == 0 || !bitmap.is_range_set(index, count).unwrap_or(false) {
            drop(bitmap);
            warn!("free_frames({pa}, {count}): run is not leased");
            return Err(AllocError::InvalidFree(pa));
        }
        bitmap.clear_range(index, count)?;
        self.allocated.sub(count as u64);
        drop(bitmap);

        trace!("free_frames({pa}, {count})");
        Ok(())
    }

    /// Marks a run as leased without handing it out, for memory the kernel
    /// already occupies when the allocator starts.
    ///
    /// # Errors
    /// [`AllocError::InvalidArgument`] if the run leaves the managed range or
    /// overlaps a leased frame.
    pub fn reserve_frames(&self, pa: PhysicalAddress, count: usize) -> Result<(), AllocError> {
        let index = self
            .frame_index(pa)
            .ok_or(AllocError::InvalidArgument("reserved run outside managed range"))?;

        let mut bitmap = self.bitmap.lock();
        let end = index
            .checked_add(count)
            .filter(|end| count != 0 && *end <= self.total_frames)
            .ok_or(AllocError::InvalidArgument("reserved run outside managed range"))?;
        if (index..end).any(|i| bitmap.test(i).unwrap_or(true)) {
            return Err(AllocError::InvalidArgument("reserved run overlaps leased frames"));
        }
        bitmap.set_range(index, count, true)?;
        self.allocated.add(count as u64);
        drop(bitmap);

        info!("reserved {count} frames at {pa}");
        Ok(())
    }

    /// Consistent snapshot: `allocated + free == total` always holds.
    #[must_use]
    pub fn stats(&self) -> FrameStats {
        let bitmap = self.bitmap.lock();
        let free = bitmap.count_zeros();
        FrameStats {
            total: self.total_frames,
            allocated: self.total_frames - free,
            free,
        }
    }
}

impl<R: RawLock + RawUnlock> FrameSource for BitmapFrameAlloc<'_, R> {
    fn alloc_frames(&self, count: usize) -> Result<PhysicalAddress, AllocError> {
        Self::alloc_frames(self, count)
    }

    fn free_frames(&self, base: PhysicalAddress, count: usize) -> Result<(), AllocError> {
        Self::free_frames(self, base, count)
    }
}

impl<R> core::fmt::Debug for BitmapFrameAlloc<'_, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BitmapFrameAlloc")
            .field("base", &self.base)
            .field("total_frames", &self.total_frames)
            .field("allocated", &self.allocated)
            .finish_non_exhaustive()
    }
}
