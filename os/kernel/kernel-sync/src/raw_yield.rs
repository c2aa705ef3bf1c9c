use crate::{RawLock, RawUnlock};
use core::sync::atomic::{AtomicBool, Ordering};

/// Host-only raw lock: same acquire/release protocol as
/// [`RawSpin`](crate::RawSpin), but a contended waiter yields its time slice
/// to the host scheduler instead of spinning.
///
/// Test suites oversubscribe cores with threads; spinning waiters would then
/// starve the holder they are waiting on.
pub struct RawYield {
    held: AtomicBool,
}

impl Default for RawYield {
    fn default() -> Self {
        Self::new()
    }
}

impl RawYield {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
        }
    }
}

impl RawLock for RawYield {
    fn raw_lock(&self) {
        while !self.raw_try_lock() {
            std::thread::yield_now();
        }
    }

    fn raw_try_lock(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn raw_is_locked(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }
}

impl RawUnlock for RawYield {
    unsafe fn raw_unlock(&self) {
        let was_held = self.held.swap(false, Ordering::Release);
        debug_assert!(was_held, "released a lock that was not held");
    }
}
