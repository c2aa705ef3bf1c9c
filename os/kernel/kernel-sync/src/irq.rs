//! Interrupt masking for critical sections that interrupt handlers also enter.
//!
//! On bare-metal x86-64 (`target_os = "none"`) these helpers use
//! `pushfq`/`cli`/`sti`. With the `hosted` feature a per-thread flag stands in
//! for `IF`, starting out enabled, so tests can observe which code runs
//! masked. Other builds have no interrupts to mask; the helpers do nothing and
//! report interrupts as disabled.

use crate::{RawLock, RawUnlock, SpinLock, SpinLockGuard};
use core::ops::{Deref, DerefMut};

/// `IF` bit in `RFLAGS`.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
const RFLAGS_IF: u64 = 1 << 9;

#[cfg(all(feature = "hosted", not(all(target_arch = "x86_64", target_os = "none"))))]
std::thread_local! {
    static HOSTED_IF: core::cell::Cell<bool> = const { core::cell::Cell::new(true) };
}

/// A spin lock guard that also keeps interrupts disabled while held.
///
/// Created via [`SpinLock::lock_irq`], which
///
/// 1. saves the current interrupt state and disables interrupts, and
/// 2. acquires the underlying lock,
///
/// releasing them in reverse order on drop. An interrupt handler on the same
/// core can then never spin on a lock its own core already holds.
pub struct IrqSpinLockGuard<'a, T, R: RawUnlock> {
    // Field order is drop order: unlock first, then restore interrupts.
    guard: SpinLockGuard<'a, T, R>,
    _irq: IrqGuard,
}

impl<T, R: RawLock + RawUnlock> SpinLock<T, R> {
    /// Acquires the lock with interrupts disabled for the guard's lifetime.
    #[inline]
    pub fn lock_irq(&self) -> IrqSpinLockGuard<'_, T, R> {
        let irq = IrqGuard::new();
        let guard = self.lock();
        IrqSpinLockGuard { guard, _irq: irq }
    }
}

impl<T, R: RawUnlock> Deref for IrqSpinLockGuard<'_, T, R> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T, R: RawUnlock> DerefMut for IrqSpinLockGuard<'_, T, R> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// Whether maskable interrupts are currently enabled on this core.
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    {
        let rflags: u64;
        unsafe {
            core::arch::asm!("pushfq; pop {}", out(reg) rflags, options(preserves_flags));
        }
        rflags & RFLAGS_IF != 0
    }
    #[cfg(all(feature = "hosted", not(all(target_arch = "x86_64", target_os = "none"))))]
    {
        HOSTED_IF.with(core::cell::Cell::get)
    }
    #[cfg(not(any(feature = "hosted", all(target_arch = "x86_64", target_os = "none"))))]
    {
        false
    }
}

/// Disables maskable interrupts (`cli`).
///
/// Must only be called where `cli` is permitted (ring 0).
#[inline]
pub fn disable_interrupts() {
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    unsafe {
        core::arch::asm!("cli", options(nomem, nostack, preserves_flags));
    }
    #[cfg(all(feature = "hosted", not(all(target_arch = "x86_64", target_os = "none"))))]
    HOSTED_IF.with(|flag| flag.set(false));
}

/// Enables maskable interrupts (`sti`).
///
/// Must only be called where `sti` is permitted (ring 0).
#[inline]
pub fn enable_interrupts() {
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    unsafe {
        core::arch::asm!("sti", options(nomem, nostack, preserves_flags));
    }
    #[cfg(all(feature = "hosted", not(all(target_arch = "x86_64", target_os = "none"))))]
    HOSTED_IF.with(|flag| flag.set(true));
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// Interrupts are re-enabled on drop **only** if they were enabled when the
/// guard was created, so guards nest.
///
/// ```rust
/// use kernel_sync::IrqGuard;
///
/// {
///     let _outer = IrqGuard::new();
///     let _inner = IrqGuard::new(); // nesting is fine
/// }
/// ```
pub struct IrqGuard {
    /// Whether interrupts were enabled (IF=1) when the guard was created.
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let enabled = interrupts_enabled();
        if enabled {
            disable_interrupts();
        }
        Self {
            were_enabled: enabled,
        }
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            enable_interrupts();
        }
    }
}
