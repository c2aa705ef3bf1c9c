//! # Physical and Virtual Memory Address Types
//!
//! Strongly typed wrappers for raw 64-bit addresses used by the frame and heap
//! allocators.
//!
//! ## Overview
//!
//! Allocator code hands out **physical** addresses, while ordinary kernel code
//! dereferences **virtual** pointers. Mixing the two is the classic bug of
//! hand-written memory managers, so both address spaces get their own type:
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`MemoryAddress`] | A raw 64-bit address of unspecified kind. |
//! | [`PhysicalAddress`] | Refers to physical memory (RAM or MMIO). |
//! | [`VirtualAddress`] | Refers to memory as seen through the page tables. |
//!
//! There is deliberately no arithmetic between a [`PhysicalAddress`] and a
//! [`VirtualAddress`]. The only way across is an explicit translation, which
//! lives with the allocator (`kernel_alloc::phys_mapper`).
//!
//! ## Page Sizes
//!
//! Alignment helpers are generic over a [`PageSize`] marker. Frames are 4 KiB
//! on every supported target, so [`Size4K`] is the only marker provided.
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0010_2042);
//! assert_eq!(pa.align_down::<Size4K>().as_u64(), 0x0010_2000);
//! assert_eq!(pa.align_up::<Size4K>().map(PhysicalAddress::as_u64), Some(0x0010_3000));
//! assert!(!pa.is_aligned::<Size4K>());
//!
//! let base = PhysicalAddress::new(0x0010_0000);
//! assert_eq!(pa.offset_from(base), Some(0x2042));
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod memory_address;
mod page_size;
mod physical_address;
mod virtual_address;

pub use memory_address::MemoryAddress;
pub use page_size::{PageSize, Size4K};
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;
