use crate::{RawLock, RawUnlock};
use core::hint::spin_loop;
use core::sync::atomic::{AtomicUsize, Ordering};

const UNLOCKED: usize = 0;
const LOCKED: usize = 1;

/// A busy-wait lock in a single machine word.
///
/// The word is `0` while the lock is free and a non-zero marker while it is
/// held. It only changes through [`acquire`](Self::acquire) (compare-and-swap
/// `0 → LOCKED`) and [`release`](Self::release) (store `0` with release
/// ordering).
///
/// ```rust
/// use kernel_sync::RawSpin;
///
/// let lock = RawSpin::new();
/// lock.acquire();
/// assert!(lock.is_locked());
/// assert!(!lock.try_acquire());
/// unsafe { lock.release() };
/// assert!(!lock.is_locked());
/// ```
pub struct RawSpin {
    word: AtomicUsize,
}

impl Default for RawSpin {
    fn default() -> Self {
        Self::new()
    }
}

impl RawSpin {
    /// A lock in the unlocked state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            word: AtomicUsize::new(UNLOCKED),
        }
    }

    /// Spin until the lock is taken (test-and-test-and-set).
    #[inline]
    pub fn acquire(&self) {
        while !self.try_acquire() {
            // Wait on a plain load so contenders don't bounce the cache line.
            while self.word.load(Ordering::Relaxed) != UNLOCKED {
                spin_loop();
            }
        }
    }

    /// Take the lock if it is free; returns immediately either way.
    #[inline]
    pub fn try_acquire(&self) -> bool {
        self.word
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Release the lock, publishing everything written while it was held.
    ///
    /// # Safety
    /// The caller must hold the lock. Releasing a free lock trips a debug
    /// assertion; in release builds it silently leaves the lock free.
    #[inline]
    pub unsafe fn release(&self) {
        #[cfg(debug_assertions)]
        {
            let prev = self.word.swap(UNLOCKED, Ordering::Release);
            debug_assert_ne!(prev, UNLOCKED, "released a spinlock that was not held");
        }
        #[cfg(not(debug_assertions))]
        {
            self.word.store(UNLOCKED, Ordering::Release);
        }
    }

    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.word.load(Ordering::Relaxed) != UNLOCKED
    }
}

impl RawLock for RawSpin {
    fn raw_lock(&self) {
        self.acquire();
    }

    fn raw_try_lock(&self) -> bool {
        self.try_acquire()
    }

    fn raw_is_locked(&self) -> bool {
        self.is_locked()
    }
}

impl RawUnlock for RawSpin {
    unsafe fn raw_unlock(&self) {
        unsafe { self.release() }
    }
}
