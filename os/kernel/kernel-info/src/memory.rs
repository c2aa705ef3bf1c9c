//! # Memory Layout and Allocator Tuning

use kernel_memory_addresses::{PageSize, Size4K};

/// A simple Higher Half Direct Map (HHDM) base.
/// Anything mapped at [`HHDM_BASE`] + `pa` lets the kernel
/// access physical memory via a fixed offset.
///
/// Boot code must map all of physical memory there before the allocators
/// hand out their first address.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// Size of one physical frame in bytes.
pub const FRAME_SIZE: u64 = Size4K::SIZE;

/// Smallest unit the heap hands out, in bytes.
///
/// Every heap allocation is a whole number of units and starts on a unit
/// boundary, so this is also the alignment every allocation gets for free.
pub const HEAP_UNIT_SIZE: u64 = 16;

/// Minimum number of frames the heap leases from the frame allocator
/// whenever it runs out of room (64 KiB).
pub const HEAP_GROW_FRAMES: usize = 16;

/// Capacity of the heap's region table.
pub const MAX_HEAP_REGIONS: usize = 64;

/// Largest amount of physical memory the global frame allocator can track.
///
/// Sizes the statically reserved frame bitmap (one bit per frame).
pub const MAX_PHYSICAL_MEMORY: u64 = 64 * 1024 * 1024 * 1024; // 64 GiB

/// Bytes of bitmap needed to track [`MAX_PHYSICAL_MEMORY`].
#[allow(clippy::cast_possible_truncation)]
pub const MAX_FRAME_BITMAP_BYTES: usize = (MAX_PHYSICAL_MEMORY / FRAME_SIZE).div_ceil(8) as usize;

const _: () = {
    assert!(HEAP_UNIT_SIZE.is_power_of_two());
    assert!(FRAME_SIZE.is_multiple_of(HEAP_UNIT_SIZE));
    assert!(HEAP_GROW_FRAMES > 0);
    assert!(MAX_HEAP_REGIONS > 0);
    assert!(MAX_PHYSICAL_MEMORY.is_multiple_of(FRAME_SIZE));
    // The direct map must not wrap the address space.
    assert!(HHDM_BASE.checked_add(MAX_PHYSICAL_MEMORY).is_some());
};
