//! # Bitmap heap
//!
//! Byte-granular allocation carved out of frames leased from a
//! [`FrameSource`]. Memory is handed out in [`HEAP_UNIT_SIZE`] units.
//!
//! ## Regions
//!
//! Each lease of contiguous frames becomes a *region*. A region's first bytes
//! hold two bitmaps with one bit per unit of the region:
//!
//! ```text
//! base                                                    base + frames * FRAME_SIZE
//! ├─ used map ─┼─ head map ─┼─ pad ─┼──────── allocatable units ─────────┤
//! └──────── reserved units ─────────┘
//! ```
//!
//! * `used`: the unit belongs to an allocation (or to the maps themselves).
//! * `head`: the unit is the first unit of an allocation.
//!
//! The head map is the extent record. An allocation runs from its head unit
//! up to, but not including, the next unit that is free or is another head,
//! so [`BitmapHeap::pfree`] needs nothing but the address. Units under the
//! maps are marked used but never head, so they can never be freed.
//!
//! Regions are kept in a fixed table of [`MAX_HEAP_REGIONS`] entries and
//! searched first-fit in table order. When no region has room the heap leases
//! at least [`HEAP_GROW_FRAMES`] more frames.
//!
//! ## Locking
//!
//! One spin lock covers the region table and every region's maps. Growth
//! calls into the frame source with that lock held, so the lock order is
//! always heap, then frames.

use crate::{AllocError, Bitmap, FrameSource, PhysMapper};
use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};
use kernel_info::memory::{FRAME_SIZE, HEAP_GROW_FRAMES, HEAP_UNIT_SIZE, MAX_HEAP_REGIONS};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_sync::{AtomicCounter, RawLock, RawSpin, RawUnlock, SpinLock};
use log::{debug, trace, warn};

#[allow(clippy::cast_possible_truncation)]
const UNIT: usize = HEAP_UNIT_SIZE as usize;

#[allow(clippy::cast_possible_truncation)]
const UNITS_PER_FRAME: usize = (FRAME_SIZE / HEAP_UNIT_SIZE) as usize;

/// Units per frame taken by the two maps.
const MAP_UNITS_PER_FRAME: usize = 2 * UNITS_PER_FRAME / 8 / UNIT;

/// Snapshot of heap usage. Byte figures count whole units.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HeapStats {
    pub regions: usize,
    pub frames: usize,
    /// Bytes available to allocations across all regions.
    pub capacity: usize,
    pub used: usize,
    pub free: usize,
    pub live_allocations: u64,
}

#[derive(Debug, Copy, Clone)]
struct HeapRegion {
    base: PhysicalAddress,
    frames: usize,
    units: usize,
    map_bytes: usize,
    reserved: usize,
    /// Units held by live allocations.
    used: usize,
}

impl HeapRegion {
    const fn new(base: PhysicalAddress, frames: usize) -> Self {
        let units = frames * UNITS_PER_FRAME;
        let map_bytes = units.div_ceil(8);
        Self {
            base,
            frames,
            units,
            map_bytes,
            reserved: (2 * map_bytes).div_ceil(UNIT),
            used: 0,
        }
    }

    /// Smallest region, no smaller than a growth step, that fits `units`
    /// at the given alignment.
    fn frames_for(units: usize, align_units: usize) -> usize {
        let mut frames = units
            .div_ceil(UNITS_PER_FRAME - MAP_UNITS_PER_FRAME)
            .max(HEAP_GROW_FRAMES);
        while !Self::new(PhysicalAddress::zero(), frames).fits_fresh(units, align_units) {
            frames += 1;
        }
        frames
    }

    const fn fits_fresh(&self, units: usize, align_units: usize) -> bool {
        self.reserved.next_multiple_of(align_units) + units <= self.units
    }

    const fn free_units(&self) -> usize {
        self.units - self.reserved - self.used
    }

    fn unit_of(&self, pa: PhysicalAddress) -> Option<usize> {
        let offset = usize::try_from(pa.offset_from(self.base)?).ok()?;
        if offset >= self.units * UNIT || offset % UNIT != 0 {
            return None;
        }
        Some(offset / UNIT)
    }

    fn contains(&self, pa: PhysicalAddress) -> bool {
        pa.offset_from(self.base)
            .is_some_and(|offset| offset < (self.units * UNIT) as u64)
    }

    const fn address_of(&self, unit: usize) -> PhysicalAddress {
        PhysicalAddress::new(self.base.as_u64() + (unit * UNIT) as u64)
    }

    /// The region's `used` and `head` maps.
    ///
    /// # Safety
    /// The region must be mapped by `mapper`, and the caller must hold the
    /// heap lock for as long as the maps live.
    unsafe fn maps<'m, M: PhysMapper>(
        &self,
        mapper: &M,
    ) -> Result<(Bitmap<'m>, Bitmap<'m>), AllocError> {
        // SAFETY: forwarded to the caller.
        let bytes = unsafe { mapper.phys_slice_mut(self.base, 2 * self.map_bytes) };
        let (used, head) = bytes.split_at_mut(self.map_bytes);
        Ok((
            Bitmap::attach(used, self.units)?,
            Bitmap::attach(head, self.units)?,
        ))
    }

    /// Clears both maps and marks the units under them as used.
    ///
    /// # Safety
    /// As for [`HeapRegion::maps`].
    unsafe fn format<M: PhysMapper>(&self, mapper: &M) -> Result<(), AllocError> {
        let length = isize::try_from(self.map_bytes)
            .map_err(|_| AllocError::InvalidArgument("heap region too large"))?;
        // SAFETY: forwarded to the caller.
        let bytes = unsafe { mapper.phys_slice_mut(self.base, 2 * self.map_bytes) };
        let (used, head) = bytes.split_at_mut(self.map_bytes);
        let mut used = Bitmap::with_units(used, length, self.units)?;
        Bitmap::with_units(head, length, self.units)?;
        used.set_range(0, self.reserved, true)
    }
}

struct HeapState {
    regions: [Option<HeapRegion>; MAX_HEAP_REGIONS],
}

pub struct BitmapHeap<'f, F: FrameSource, M: PhysMapper, R = RawSpin> {
    frames: &'f F,
    mapper: M,
    state: SpinLock<HeapState, R>,
    allocated_bytes: AtomicCounter,
    live_allocations: AtomicCounter,
}

impl<'f, F: FrameSource, M: PhysMapper> BitmapHeap<'f, F, M, RawSpin> {
    /// An empty heap; the first allocation leases its first region.
    #[must_use]
    pub const fn new(frames: &'f F, mapper: M) -> Self {
        Self::from_raw(RawSpin::new(), frames, mapper)
    }
}

impl<'f, F: FrameSource, M: PhysMapper, R> BitmapHeap<'f, F, M, R> {
    /// An empty heap guarded by the given raw lock.
    #[must_use]
    pub const fn from_raw(raw: R, frames: &'f F, mapper: M) -> Self {
        Self {
            frames,
            mapper,
            state: SpinLock::from_raw(
                raw,
                HeapState {
                    regions: [None; MAX_HEAP_REGIONS],
                },
            ),
            allocated_bytes: AtomicCounter::zero(),
            live_allocations: AtomicCounter::zero(),
        }
    }

    #[must_use]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }
}

impl<F: FrameSource, M: PhysMapper, R: RawLock + RawUnlock> BitmapHeap<'_, F, M, R> {
    /// Allocates `size` bytes, rounded up to whole units, aligned to a unit.
    ///
    /// # Errors
    /// * [`AllocError::InvalidArgument`] for `size == 0`.
    /// * [`AllocError::OutOfMemory`] if no region has room and no more
    ///   frames can be leased.
    pub fn pmalloc(&self, size: usize) -> Result<PhysicalAddress, AllocError> {
        self.pmalloc_aligned(size, UNIT)
    }

    /// Like [`BitmapHeap::pmalloc`], aligned to `align` bytes.
    ///
    /// # Errors
    /// As for [`BitmapHeap::pmalloc`], plus [`AllocError::InvalidArgument`]
    /// if `align` is not a power of two or exceeds a frame.
    pub fn pmalloc_aligned(&self, size: usize, align: usize) -> Result<PhysicalAddress, AllocError> {
        if size == 0 {
            return Err(AllocError::InvalidArgument("zero-size allocation"));
        }
        if !align.is_power_of_two() || align as u64 > FRAME_SIZE {
            return Err(AllocError::InvalidArgument("unsupported heap alignment"));
        }
        let units = size.div_ceil(UNIT);
        let align_units = (align / UNIT).max(1);

        let mut state = self.state.lock();
        let result = self.alloc_locked(&mut state, units, align_units);
        if result.is_ok() {
            self.allocated_bytes.add((units * UNIT) as u64);
            self.live_allocations.increment();
        }
        drop(state);

        match result {
            Ok(pa) => {
                trace!("pmalloc({size}) = {pa}");
                Ok(pa)
            }
            Err(e) => {
                warn!("pmalloc({size}): {e}");
                Err(e)
            }
        }
    }

    /// Frees the allocation starting at `pa`.
    ///
    /// # Errors
    /// [`AllocError::InvalidFree`] if `pa` is not the start of a live
    /// allocation of this heap; nothing changes in that case.
    pub fn pfree(&self, pa: PhysicalAddress) -> Result<(), AllocError> {
        let mut state = self.state.lock();
        let region = state.regions.iter_mut().flatten().find(|r| r.contains(pa));
        let released = match region {
            // SAFETY: the region belongs to this heap; the lock is held.
            Some(region) => unsafe { Self::release_in(&self.mapper, region, pa) }?,
            None => None,
        };
        if let Some(units) = released {
            self.allocated_bytes.sub((units * UNIT) as u64);
            self.live_allocations.decrement();
        }
        drop(state);

        let Some(units) = released else {
            warn!("pfree({pa}): not a live heap allocation");
            return Err(AllocError::InvalidFree(pa));
        };
        trace!("pfree({pa}) released {} bytes", units * UNIT);
        Ok(())
    }

    /// Allocates `size` bytes and returns a pointer to them.
    ///
    /// Every failure, including `size == 0`, yields `None`.
    #[must_use]
    pub fn malloc(&self, size: usize) -> Option<NonNull<u8>> {
        let pa = self.pmalloc(size).ok()?;
        NonNull::new(self.mapper.phys_to_virt(pa).as_mut_ptr())
    }

    /// Frees memory returned by [`BitmapHeap::malloc`]. A null pointer is a
    /// no-op.
    ///
    /// # Errors
    /// [`AllocError::InvalidFree`] if `ptr` is not a live allocation.
    pub fn free(&self, ptr: *mut u8) -> Result<(), AllocError> {
        if ptr.is_null() {
            return Ok(());
        }
        self.pfree(self.mapper.virt_to_phys(VirtualAddress::from_ptr(ptr)))
    }

    /// Returns regions without live allocations to the frame source and
    /// reports how many went back.
    #[must_use]
    pub fn release_empty_regions(&self) -> usize {
        let mut state = self.state.lock();
        let mut released = 0;
        for slot in &mut state.regions {
            if let Some(region) = slot
                && region.used == 0
                && self.frames.free_frames(region.base, region.frames).is_ok()
            {
                debug!("heap: returned {} frames at {}", region.frames, region.base);
                *slot = None;
                released += 1;
            }
        }
        released
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let state = self.state.lock();
        let mut stats = HeapStats {
            regions: 0,
            frames: 0,
            capacity: 0,
            used: 0,
            free: 0,
            live_allocations: self.live_allocations.get(),
        };
        for region in state.regions.iter().flatten() {
            stats.regions += 1;
            stats.frames += region.frames;
            stats.capacity += (region.units - region.reserved) * UNIT;
            stats.used += region.used * UNIT;
            stats.free += region.free_units() * UNIT;
        }
        stats
    }

    /// Bytes held by live allocations; a lock-free snapshot.
    #[must_use]
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes.get()
    }

    fn alloc_locked(
        &self,
        state: &mut HeapState,
        units: usize,
        align_units: usize,
    ) -> Result<PhysicalAddress, AllocError> {
        if let Some(pa) = self.alloc_in_regions(state, units, align_units)? {
            return Ok(pa);
        }
        let slot = self.grow(state, units, align_units)?;
        let region = state.regions[slot].as_mut().ok_or(AllocError::OutOfMemory)?;
        // SAFETY: `grow` just leased and formatted the region; the lock is held.
        unsafe { Self::alloc_in(&self.mapper, region, units, align_units) }?
            .ok_or(AllocError::OutOfMemory)
    }

    fn alloc_in_regions(
        &self,
        state: &mut HeapState,
        units: usize,
        align_units: usize,
    ) -> Result<Option<PhysicalAddress>, AllocError> {
        for region in state.regions.iter_mut().flatten() {
            if region.free_units() < units {
                continue;
            }
            // SAFETY: the region belongs to this heap; the lock is held.
            if let Some(pa) = unsafe { Self::alloc_in(&self.mapper, region, units, align_units) }? {
                return Ok(Some(pa));
            }
        }
        Ok(None)
    }

    /// Leases and formats a region big enough for `units`, returning its slot.
    fn grow(
        &self,
        state: &mut HeapState,
        units: usize,
        align_units: usize,
    ) -> Result<usize, AllocError> {
        let Some(slot) = state.regions.iter().position(Option::is_none) else {
            warn!("heap: all {MAX_HEAP_REGIONS} region slots in use");
            return Err(AllocError::OutOfMemory);
        };

        let frames = HeapRegion::frames_for(units, align_units);
        let base = self.frames.alloc_frames(frames)?;
        let region = HeapRegion::new(base, frames);

        // SAFETY: the frames were just leased to us and the lock is held.
        if let Err(e) = unsafe { region.format(&self.mapper) } {
            let _ = self.frames.free_frames(base, frames);
            return Err(e);
        }

        debug!(
            "heap: leased {frames} frames at {base}, {} bytes allocatable",
            (region.units - region.reserved) * UNIT
        );
        state.regions[slot] = Some(region);
        Ok(slot)
    }

    /// # Safety
    /// As for [`HeapRegion::maps`].
    unsafe fn alloc_in(
        mapper: &M,
        region: &mut HeapRegion,
        units: usize,
        align_units: usize,
    ) -> Result<Option<PhysicalAddress>, AllocError> {
        // SAFETY: forwarded to the caller.
        let (mut used, mut head) = unsafe { region.maps(mapper) }?;
        match used.alloc_aligned(units, align_units) {
            Ok(start) => {
                head.set(start, true)?;
                region.used += units;
                Ok(Some(region.address_of(start)))
            }
            Err(AllocError::OutOfMemory) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Clears the allocation starting at `pa` and returns its length in
    /// units, or `None` if no allocation starts there.
    ///
    /// # Safety
    /// As for [`HeapRegion::maps`].
    unsafe fn release_in(
        mapper: &M,
        region: &mut HeapRegion,
        pa: PhysicalAddress,
    ) -> Result<Option<usize>, AllocError> {
        let Some(start) = region.unit_of(pa) else {
            return Ok(None);
        };
        // SAFETY: forwarded to the caller.
        let (mut used, mut head) = unsafe { region.maps(mapper) }?;
        if start < region.reserved || !head.test(start)? {
            return Ok(None);
        }

        let mut end = start + 1;
        while end < region.units && used.test(end)? && !head.test(end)? {
            end += 1;
        }
        let units = end - start;

        used.clear_range(start, units)?;
        head.set(start, false)?;
        region.used -= units;
        Ok(Some(units))
    }
}

/// Returns every empty region to the frame source.
///
/// Regions that still hold allocations stay leased. Pointers into them are
/// not tied to the heap's lifetime, so their frames must never be handed out
/// again.
impl<F: FrameSource, M: PhysMapper, R> Drop for BitmapHeap<'_, F, M, R> {
    fn drop(&mut self) {
        let frames = self.frames;
        for region in self.state.get_mut().regions.iter_mut().filter_map(Option::take) {
            if region.used != 0 {
                warn!(
                    "heap: leaking {} frames at {} with {} bytes still allocated",
                    region.frames,
                    region.base,
                    region.used * UNIT
                );
                continue;
            }
            if let Err(e) = frames.free_frames(region.base, region.frames) {
                warn!("heap: could not return region at {}: {e}", region.base);
            }
        }
    }
}

// SAFETY: blocks come from `pmalloc_aligned`, which never hands out
// overlapping runs and honours alignments up to a frame; larger alignments
// return null.
unsafe impl<F, M, R> GlobalAlloc for BitmapHeap<'_, F, M, R>
where
    F: FrameSource,
    M: PhysMapper,
    R: RawLock + RawUnlock,
{
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        match self.pmalloc_aligned(layout.size().max(1), layout.align()) {
            Ok(pa) => self.mapper.phys_to_virt(pa).as_mut_ptr(),
            Err(_) => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let freed = self.free(ptr);
        debug_assert!(freed.is_ok(), "dealloc of a block this heap did not hand out");
    }
}
