use crate::{RawLock, RawSpin, RawUnlock};
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
};

/// A value guarded by a raw busy-wait lock.
///
/// `R` defaults to [`RawSpin`]; any [`RawLock`] + [`RawUnlock`] works, which is
/// how host tests substitute a yielding lock.
///
/// ```rust
/// use kernel_sync::SpinLock;
///
/// static COUNTER: SpinLock<u64> = SpinLock::new(0);
///
/// *COUNTER.lock() += 1;
/// assert_eq!(COUNTER.with_lock(|v| *v), 1);
/// ```
pub struct SpinLock<T, R = RawSpin> {
    raw: R,
    inner: UnsafeCell<T>,
}

// Safety: mutual exclusion; only T: Send may cross threads.
unsafe impl<T: Send, R: Sync> Sync for SpinLock<T, R> {}
unsafe impl<T: Send, R: Send> Send for SpinLock<T, R> {}

impl<T> SpinLock<T, RawSpin> {
    pub const fn new(inner: T) -> Self {
        Self::from_raw(RawSpin::new(), inner)
    }
}

impl<T, R> SpinLock<T, R> {
    /// Wrap `inner` with an explicitly constructed raw lock.
    pub const fn from_raw(raw: R, inner: T) -> Self {
        Self {
            raw,
            inner: UnsafeCell::new(inner),
        }
    }

    /// Mutable access when you have `&mut self` (no contention possible).
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T, R> SpinLock<T, R>
where
    R: RawLock + RawUnlock,
{
    /// Spin until acquired, then return a guard.
    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, T, R> {
        self.raw.raw_lock();
        SpinLockGuard { lock: self }
    }

    /// Try once; returns immediately.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T, R>> {
        if self.raw.raw_try_lock() {
            Some(SpinLockGuard { lock: self })
        } else {
            None
        }
    }

    /// Closure convenience, built on the guard.
    #[inline]
    pub fn with_lock<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        let mut g = self.lock();
        f(&mut g)
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.raw.raw_is_locked()
    }
}

/// Exclusive access to the value of a [`SpinLock`]; unlocks on drop.
pub struct SpinLockGuard<'a, T, R>
where
    R: RawUnlock,
{
    lock: &'a SpinLock<T, R>,
}

impl<T, R> Deref for SpinLockGuard<'_, T, R>
where
    R: RawUnlock,
{
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.inner.get() }
    }
}

impl<T, R> DerefMut for SpinLockGuard<'_, T, R>
where
    R: RawUnlock,
{
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.inner.get() }
    }
}

impl<T, R> Drop for SpinLockGuard<'_, T, R>
where
    R: RawUnlock,
{
    fn drop(&mut self) {
        // Release publishes the critical section.
        unsafe { self.lock.raw.raw_unlock() }
    }
}
