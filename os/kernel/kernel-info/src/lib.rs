//! # Kernel Memory Configuration
//!
//! Compile-time constants shared by the allocator crates: where the kernel sees
//! physical memory, how large a frame is, and how the heap grows.
//!
//! Runtime facts that only the platform knows (how much physical memory there
//! is and where it starts) are **not** configured here. They are handed to the
//! allocators once at `mem_init` time by the boot code.
//!
//! ```text
//! Virtual Address Space Layout (64-bit):
//!
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │         User Space              │
//!                       ├─────────────────────────────────┤ 0xffff_0000_0000_0000
//!                       │        Guard Region             │
//! HHDM_BASE             ├─────────────────────────────────┤ 0xffff_8880_0000_0000
//!                       │   Higher Half Direct Mapping    │
//!                       │  (every physical byte at        │
//!                       │   HHDM_BASE + pa)               │
//!                       ├─────────────────────────────────┤ 0xffff_ffff_8000_0000
//!                       │       Kernel Text & Data        │
//! 0xFFFF_FFFF_FFFF_FFFF └─────────────────────────────────┘
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod memory;
