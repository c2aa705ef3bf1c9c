//! # Physical-to-virtual translation
//!
//! The kernel maps all of physical memory at a fixed offset, the higher-half
//! direct map (HHDM): physical address `pa` is visible at `HHDM_BASE + pa`.
//! Translation is therefore pure arithmetic, total over all inputs, and does
//! not validate that the address is mapped.
//!
//! Allocators never hard-code the offset. They go through [`PhysMapper`] so a
//! host test can point the same code at an ordinary buffer with
//! [`OffsetPhysMapper`].
//!
//! ```rust
//! use kernel_alloc::phys_mapper::{phys_to_virt, virt_to_phys};
//! use kernel_info::memory::HHDM_BASE;
//! use kernel_memory_addresses::PhysicalAddress;
//!
//! let pa = PhysicalAddress::new(0x1234_0000);
//! let va = phys_to_virt(pa);
//! assert_eq!(va.as_u64(), HHDM_BASE + 0x1234_0000);
//! assert_eq!(virt_to_phys(va), pa);
//! ```

use kernel_info::memory::HHDM_BASE;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Translates a physical address into the direct map.
#[must_use]
pub const fn phys_to_virt(pa: PhysicalAddress) -> VirtualAddress {
    VirtualAddress::new(pa.as_u64().wrapping_add(HHDM_BASE))
}

/// Inverse of [`phys_to_virt`]; only meaningful for direct-map addresses.
#[must_use]
pub const fn virt_to_phys(va: VirtualAddress) -> PhysicalAddress {
    PhysicalAddress::new(va.as_u64().wrapping_sub(HHDM_BASE))
}

/// How an allocator reaches the memory behind a physical address.
pub trait PhysMapper {
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress;

    fn virt_to_phys(&self, va: VirtualAddress) -> PhysicalAddress;

    /// Views `len` bytes of physical memory as a mutable slice.
    ///
    /// # Safety
    /// The range must be mapped, writable, and not aliased by any other live
    /// reference for `'a`.
    unsafe fn phys_slice_mut<'a>(&self, pa: PhysicalAddress, len: usize) -> &'a mut [u8] {
        let ptr = self.phys_to_virt(pa).as_mut_ptr::<u8>();
        // SAFETY: forwarded to the caller.
        unsafe { core::slice::from_raw_parts_mut(ptr, len) }
    }
}

/// The kernel's direct map at [`HHDM_BASE`].
#[derive(Debug, Default, Copy, Clone)]
pub struct HhdmPhysMapper;

impl PhysMapper for HhdmPhysMapper {
    #[inline]
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress {
        phys_to_virt(pa)
    }

    #[inline]
    fn virt_to_phys(&self, va: VirtualAddress) -> PhysicalAddress {
        virt_to_phys(va)
    }
}

/// A direct map at an arbitrary offset.
///
/// Hosted tests describe a heap-allocated buffer as "physical memory" starting
/// at some base address and let this mapper translate into the buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OffsetPhysMapper {
    offset: u64,
}

impl OffsetPhysMapper {
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self { offset }
    }

    /// Maps the physical window starting at `phys_base` onto `virt_base`.
    #[must_use]
    pub const fn for_window(phys_base: PhysicalAddress, virt_base: VirtualAddress) -> Self {
        Self::new(virt_base.as_u64().wrapping_sub(phys_base.as_u64()))
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }
}

impl PhysMapper for OffsetPhysMapper {
    #[inline]
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress {
        VirtualAddress::new(pa.as_u64().wrapping_add(self.offset))
    }

    #[inline]
    fn virt_to_phys(&self, va: VirtualAddress) -> PhysicalAddress {
        PhysicalAddress::new(va.as_u64().wrapping_sub(self.offset))
    }
}
