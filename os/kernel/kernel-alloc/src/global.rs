//! # Process-wide allocators
//!
//! The kernel runs one frame allocator and one heap, created by [`mem_init`]
//! from the memory range the boot code reports. Everything else in the kernel
//! reaches them through the free functions here.
//!
//! The frame bitmap lives in `.bss`, sized for [`MAX_PHYSICAL_MEMORY`], so
//! bringing the allocators up needs no memory of its own. The heap translates
//! through the direct map, [`HhdmPhysMapper`].
//!
//! Every entry point masks interrupts around its critical section, so an
//! interrupt handler on the same core can allocate too. The instances
//! themselves are only reachable through [`with_frames`] and [`with_heap`],
//! which mask interrupts for the duration of the closure.
//!
//! Before [`mem_init`] the functions fail with
//! [`AllocError::NotInitialized`], and [`malloc`] returns null.

use crate::{AllocError, BitmapFrameAlloc, BitmapHeap, FrameStats, HeapStats, HhdmPhysMapper};
use core::alloc::{GlobalAlloc, Layout};
use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering};
use kernel_info::memory::{MAX_FRAME_BITMAP_BYTES, MAX_PHYSICAL_MEMORY};
use kernel_memory_addresses::PhysicalAddress;
use kernel_sync::{IrqGuard, RawSpin, SyncOnceCell};
use log::info;

pub type KernelFrameAlloc = BitmapFrameAlloc<'static, RawSpin>;
pub type KernelHeap = BitmapHeap<'static, KernelFrameAlloc, HhdmPhysMapper, RawSpin>;

/// Frame bitmap storage, one bit per frame of [`MAX_PHYSICAL_MEMORY`].
#[cfg_attr(target_os = "none", unsafe(link_section = ".bss.frame_bitmap"))]
static mut FRAME_BITMAP: [u8; MAX_FRAME_BITMAP_BYTES] = [0; MAX_FRAME_BITMAP_BYTES];

/// Set once the bitmap storage has been lent out.
static BITMAP_TAKEN: AtomicBool = AtomicBool::new(false);

static FRAMES: SyncOnceCell<KernelFrameAlloc> = SyncOnceCell::new();
static HEAP: SyncOnceCell<KernelHeap> = SyncOnceCell::new();

/// Brings up the frame allocator over `total_memory` bytes at `base`, and
/// the heap on top of it.
///
/// # Errors
/// * [`AllocError::AlreadyInitialized`] on every call after a successful one.
/// * [`AllocError::InvalidArgument`] if the range is unusable or larger than
///   [`MAX_PHYSICAL_MEMORY`]; a later call may retry.
pub fn mem_init(base: PhysicalAddress, total_memory: u64) -> Result<(), AllocError> {
    if total_memory > MAX_PHYSICAL_MEMORY {
        return Err(AllocError::InvalidArgument("more memory than the frame bitmap covers"));
    }
    if BITMAP_TAKEN.swap(true, Ordering::AcqRel) {
        return Err(AllocError::AlreadyInitialized);
    }

    // SAFETY: `BITMAP_TAKEN` hands out the storage at most once at a time,
    // and only a successful construction keeps the borrow.
    let storage: &'static mut [u8] = unsafe { &mut *(&raw mut FRAME_BITMAP) };
    let frames = match KernelFrameAlloc::new(base, total_memory, storage) {
        Ok(frames) => frames,
        Err(e) => {
            BITMAP_TAKEN.store(false, Ordering::Release);
            return Err(e);
        }
    };

    let frames = FRAMES
        .set(frames)
        .map_err(|_| AllocError::AlreadyInitialized)?;
    HEAP.set(KernelHeap::new(frames, HhdmPhysMapper))
        .map_err(|_| AllocError::AlreadyInitialized)?;

    info!("memory initialized: {total_memory} bytes at {base}");
    Ok(())
}

/// Runs `f` on the process-wide frame allocator with interrupts masked.
///
/// The frame lock is also taken by heap growth from interrupt context, so it
/// must never be held with interrupts enabled. `f` must not re-enable them.
///
/// # Errors
/// [`AllocError::NotInitialized`] before [`mem_init`].
pub fn with_frames<T>(f: impl FnOnce(&KernelFrameAlloc) -> T) -> Result<T, AllocError> {
    let frames = FRAMES.get().ok_or(AllocError::NotInitialized)?;
    let _irq = IrqGuard::new();
    Ok(f(frames))
}

/// Runs `f` on the process-wide heap with interrupts masked.
///
/// # Errors
/// [`AllocError::NotInitialized`] before [`mem_init`].
pub fn with_heap<T>(f: impl FnOnce(&KernelHeap) -> T) -> Result<T, AllocError> {
    let heap = HEAP.get().ok_or(AllocError::NotInitialized)?;
    let _irq = IrqGuard::new();
    Ok(f(heap))
}

/// Bytes of physical memory under management.
///
/// # Errors
/// [`AllocError::NotInitialized`] before [`mem_init`].
pub fn total_memory() -> Result<u64, AllocError> {
    FRAMES
        .get()
        .map(KernelFrameAlloc::total_memory)
        .ok_or(AllocError::NotInitialized)
}

/// # Errors
/// See [`BitmapFrameAlloc::alloc_frames`].
pub fn alloc_frames(count: usize) -> Result<PhysicalAddress, AllocError> {
    with_frames(|frames| frames.alloc_frames(count))?
}

/// # Errors
/// See [`BitmapFrameAlloc::free_frames`].
pub fn free_frames(pa: PhysicalAddress, count: usize) -> Result<(), AllocError> {
    with_frames(|frames| frames.free_frames(pa, count))?
}

/// # Errors
/// See [`BitmapFrameAlloc::reserve_frames`].
pub fn reserve_frames(pa: PhysicalAddress, count: usize) -> Result<(), AllocError> {
    with_frames(|frames| frames.reserve_frames(pa, count))?
}

/// # Errors
/// [`AllocError::NotInitialized`] before [`mem_init`].
pub fn frame_stats() -> Result<FrameStats, AllocError> {
    with_frames(KernelFrameAlloc::stats)
}

/// # Errors
/// [`AllocError::NotInitialized`] before [`mem_init`].
pub fn heap_stats() -> Result<HeapStats, AllocError> {
    with_heap(KernelHeap::stats)
}

/// # Errors
/// See [`BitmapHeap::pmalloc`].
pub fn pmalloc(size: usize) -> Result<PhysicalAddress, AllocError> {
    with_heap(|heap| heap.pmalloc(size))?
}

/// # Errors
/// See [`BitmapHeap::pfree`].
pub fn pfree(pa: PhysicalAddress) -> Result<(), AllocError> {
    with_heap(|heap| heap.pfree(pa))?
}

/// Heap memory as a direct-map pointer, or null on any failure.
#[must_use]
pub fn malloc(size: usize) -> *mut u8 {
    with_heap(|heap| heap.malloc(size))
        .ok()
        .flatten()
        .map_or(ptr::null_mut(), ptr::NonNull::as_ptr)
}

/// Frees a pointer from [`malloc`]; null is a no-op.
///
/// # Errors
/// See [`BitmapHeap::free`].
pub fn free(ptr: *mut u8) -> Result<(), AllocError> {
    if ptr.is_null() {
        return Ok(());
    }
    with_heap(|heap| heap.free(ptr))?
}

/// [`GlobalAlloc`] over the process-wide heap.
///
/// Install with `#[global_allocator]` in the kernel binary. Allocations made
/// before [`mem_init`] fail with null.
#[derive(Debug, Default, Copy, Clone)]
pub struct KernelAllocator;

// SAFETY: forwards to the heap's `GlobalAlloc` implementation.
unsafe impl GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // SAFETY: forwarded from the caller.
        with_heap(|heap| unsafe { heap.alloc(layout) }).unwrap_or(ptr::null_mut())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: forwarded from the caller.
        let _ = with_heap(|heap| unsafe { heap.dealloc(ptr, layout) });
    }
}
