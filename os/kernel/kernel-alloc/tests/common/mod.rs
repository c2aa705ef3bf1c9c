#![allow(dead_code)]

use kernel_alloc::OffsetPhysMapper;
use kernel_info::memory::FRAME_SIZE;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use std::alloc::{Layout, alloc_zeroed, dealloc};

/// Where test "physical memory" starts.
pub const PHYS_BASE: PhysicalAddress = PhysicalAddress::new(0x10_0000);

/// Frame-aligned host memory standing in for physical memory at [`PHYS_BASE`].
pub struct Arena {
    ptr: *mut u8,
    layout: Layout,
}

impl Arena {
    pub fn new(frames: usize) -> Self {
        let layout = Layout::from_size_align(frames * FRAME_SIZE as usize, FRAME_SIZE as usize)
            .expect("arena layout");
        let ptr = unsafe { alloc_zeroed(layout) };
        assert!(!ptr.is_null(), "arena allocation failed");
        Self { ptr, layout }
    }

    pub fn total_memory(&self) -> u64 {
        self.layout.size() as u64
    }

    pub fn mapper(&self) -> OffsetPhysMapper {
        OffsetPhysMapper::for_window(PHYS_BASE, VirtualAddress::from_ptr(self.ptr))
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr, self.layout) };
    }
}

/// Bitmap storage large enough for `frames` frames.
pub fn storage_for(frames: usize) -> Vec<u8> {
    vec![0; frames.div_ceil(8)]
}

/// Deterministic pseudo-random sequence for model tests.
pub struct Lcg(u64);

impl Lcg {
    pub const fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next_below(&mut self, bound: usize) -> usize {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        ((self.0 >> 33) % bound as u64) as usize
    }
}
