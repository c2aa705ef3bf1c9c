//! # Kernel synchronization primitives
//!
//! The lowest layer of mutual exclusion in the kernel. Nothing here can park a
//! waiter, because these primitives are what a scheduler would be built from:
//! contended acquisition spins.
//!
//! * [`RawSpin`]: a one-word busy-wait lock (`0` = unlocked, non-zero = held).
//! * [`SpinLock`]: owns a value and hands out RAII guards; generic over the raw
//!   lock through the [`RawLock`]/[`RawUnlock`] seam.
//! * [`AtomicCounter`]: lock-free counter for statistics and reference counts.
//! * [`IrqGuard`]: masks interrupts for the lifetime of a critical section.
//! * [`SyncOnceCell`]: one-time initialization for process-wide instances.
//!
//! With the `hosted` feature the crate also provides `RawYield`, a drop-in raw
//! lock that yields to the host scheduler, so tests on a host OS can swap it in
//! without touching call sites.
//!
//! ## Contracts
//!
//! * Locks are **not** re-entrant. Acquiring a lock the current context already
//!   holds deadlocks it.
//! * There is no fairness and no bounded wait.
//! * An interrupt handler that takes a lock must either run with interrupts
//!   masked (see [`SpinLock::lock_irq`]) or never interrupt a holder of the
//!   same lock.

#![cfg_attr(not(any(test, doctest, feature = "hosted")), no_std)]
#![allow(unsafe_code)]

mod atomic_counter;
pub mod irq;
mod raw_spin;
#[cfg(feature = "hosted")]
mod raw_yield;
mod spin_lock;
mod sync_once_cell;

pub use atomic_counter::AtomicCounter;
pub use irq::{IrqGuard, IrqSpinLockGuard};
pub use raw_spin::RawSpin;
#[cfg(feature = "hosted")]
pub use raw_yield::RawYield;
pub use spin_lock::{SpinLock, SpinLockGuard};
pub use sync_once_cell::SyncOnceCell;

/// Acquisition half of a raw lock.
pub trait RawLock {
    /// Blocks until the lock is held by the caller.
    fn raw_lock(&self);

    /// Takes the lock if it is free; never waits.
    fn raw_try_lock(&self) -> bool;

    /// Whether some context currently holds the lock. Only a snapshot.
    fn raw_is_locked(&self) -> bool;
}

/// Release half of a raw lock.
pub trait RawUnlock {
    /// # Safety
    /// The caller must hold the lock, acquired through [`RawLock`].
    unsafe fn raw_unlock(&self);
}
