//! # Kernel Memory Allocation
//!
//! Physical memory management for the kernel, in two layers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Heap (pmalloc / malloc)            │
//! │    • 16-byte units inside leased frame runs         │
//! │    • In-band used/head bitmaps per region           │
//! │    • GlobalAlloc for `alloc::` collections          │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ FrameSource
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Physical Frame Allocator               │
//! │    • 4 KiB frames, one bit each                     │
//! │    • First-fit contiguous runs                      │
//! │    • Bitmap storage supplied by the caller          │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Both layers are ordinary values: they take their configuration and their
//! bitmap storage as arguments and keep their state behind a
//! [`SpinLock`](kernel_sync::SpinLock). Tests build as many isolated
//! instances as they like; the kernel builds exactly one of each through
//! [`global::mem_init`].
//!
//! Heap pointers come from physical addresses through a [`PhysMapper`]. In the
//! kernel that is the higher-half direct map ([`HhdmPhysMapper`]); on a host
//! it can be [`OffsetPhysMapper`] over an ordinary buffer.
//!
//! ## Errors
//!
//! Every fallible operation returns [`AllocError`]. Code that needs a plain
//! status word converts it into a [`Status`].
//!
//! ## Example
//!
//! ```rust
//! use kernel_alloc::{BitmapFrameAlloc, BitmapHeap, OffsetPhysMapper};
//! use kernel_info::memory::FRAME_SIZE;
//! use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
//! use std::alloc::{alloc_zeroed, dealloc, Layout};
//!
//! // 64 frames of host memory standing in for physical memory at 0.
//! let layout = Layout::from_size_align(64 * FRAME_SIZE as usize, FRAME_SIZE as usize).unwrap();
//! let arena = unsafe { alloc_zeroed(layout) };
//! let mapper = OffsetPhysMapper::for_window(PhysicalAddress::zero(), VirtualAddress::from_ptr(arena));
//!
//! let mut storage = [0_u8; 8];
//! let frames: BitmapFrameAlloc =
//!     BitmapFrameAlloc::new(PhysicalAddress::zero(), 64 * FRAME_SIZE, &mut storage).unwrap();
//! {
//!     let heap = BitmapHeap::new(&frames, mapper);
//!     let p = heap.malloc(100).unwrap();
//!     unsafe { p.as_ptr().write_bytes(0x5A, 100) };
//!     heap.free(p.as_ptr()).unwrap();
//! }
//! assert_eq!(frames.stats().free, 64);
//! unsafe { dealloc(arena, layout) };
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod bitmap;
mod error;
pub mod frame_alloc;
pub mod global;
pub mod heap;
pub mod phys_mapper;

pub use bitmap::Bitmap;
pub use error::{AllocError, Status};
pub use frame_alloc::{BitmapFrameAlloc, FrameSource, FrameStats};
pub use heap::{BitmapHeap, HeapStats};
pub use phys_mapper::{HhdmPhysMapper, OffsetPhysMapper, PhysMapper};
