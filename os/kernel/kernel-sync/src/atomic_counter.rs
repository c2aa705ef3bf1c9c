use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// Lock-free 64-bit counter.
///
/// Every mutation is a single fetch-and-add, so concurrent updates are never
/// lost. Arithmetic wraps modulo 2⁶⁴; there is no overflow or underflow
/// checking. Mutators return the value **after** the update.
///
/// ```rust
/// use kernel_sync::AtomicCounter;
///
/// let refs = AtomicCounter::new(1);
/// assert_eq!(refs.increment(), 2);
/// assert_eq!(refs.decrement(), 1);
/// assert_eq!(refs.sub(1), 0);
/// assert_eq!(refs.sub(1), u64::MAX); // wraps
/// ```
pub struct AtomicCounter {
    value: AtomicU64,
}

impl AtomicCounter {
    #[must_use]
    pub const fn new(initial: u64) -> Self {
        Self {
            value: AtomicU64::new(initial),
        }
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0)
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn add(&self, n: u64) -> u64 {
        self.value.fetch_add(n, Ordering::AcqRel).wrapping_add(n)
    }

    #[inline]
    pub fn sub(&self, n: u64) -> u64 {
        self.value.fetch_sub(n, Ordering::AcqRel).wrapping_sub(n)
    }

    #[inline]
    pub fn increment(&self) -> u64 {
        self.add(1)
    }

    #[inline]
    pub fn decrement(&self) -> u64 {
        self.sub(1)
    }
}

impl Default for AtomicCounter {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Debug for AtomicCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicCounter").field(&self.get()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_sub_return_updated_value() {
        let c = AtomicCounter::new(10);
        assert_eq!(c.add(5), 15);
        assert_eq!(c.sub(3), 12);
        assert_eq!(c.get(), 12);
    }

    #[test]
    fn increment_wraps_at_max() {
        let c = AtomicCounter::new(u64::MAX);
        assert_eq!(c.increment(), 0);
    }

    #[test]
    fn default_is_zero() {
        assert_eq!(AtomicCounter::default().get(), 0);
        assert_eq!(format!("{:?}", AtomicCounter::new(3)), "AtomicCounter(3)");
    }
}
