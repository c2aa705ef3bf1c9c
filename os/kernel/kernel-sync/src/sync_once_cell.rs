use core::{
    cell::UnsafeCell,
    hint::spin_loop,
    mem::MaybeUninit,
    sync::atomic::{AtomicU8, Ordering},
};

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const READY: u8 = 2;

/// A cell written at most once, readable from any context afterwards.
///
/// Used for process-wide instances that need runtime configuration (for
/// example an allocator sized from the boot memory map) but must live in a
/// `static`.
///
/// ```rust
/// use kernel_sync::SyncOnceCell;
///
/// static TOTAL: SyncOnceCell<u64> = SyncOnceCell::new();
///
/// assert!(TOTAL.get().is_none());
/// assert_eq!(TOTAL.set(16), Ok(&16));
/// assert_eq!(TOTAL.set(32), Err(32));
/// assert_eq!(TOTAL.get(), Some(&16));
/// ```
pub struct SyncOnceCell<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Default for SyncOnceCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SyncOnceCell<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.state.load(Ordering::Acquire) == READY
    }

    /// Returns `Some(&T)` once a value has been published.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        if self.is_initialized() {
            // SAFETY: READY is stored only after the value is written.
            Some(unsafe { self.value_unchecked() })
        } else {
            None
        }
    }

    /// Store `value` unless the cell is (being) initialized; in that case
    /// `value` is handed back.
    ///
    /// # Errors
    /// Returns `Err(value)` if another value was stored first.
    pub fn set(&self, value: T) -> Result<&T, T> {
        let mut value = Some(value);
        let stored = self.try_init(|| value.take());
        match value {
            None if stored => Ok(unsafe { self.value_unchecked() }),
            Some(v) => Err(v),
            None => unreachable!("value consumed without being stored"),
        }
    }

    /// Initialize at most once and return `&T`.
    ///
    /// Contexts racing with the initializer spin until the value is published.
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        let mut init = Some(init);
        self.try_init(|| init.take().map(|f| f()));
        self.wait_ready()
    }

    /// Runs `make` and publishes its value if this call wins the race to
    /// initialize. Returns whether it did.
    fn try_init(&self, make: impl FnOnce() -> Option<T>) -> bool {
        if self
            .state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        match make() {
            Some(v) => {
                unsafe { (*self.value.get()).write(v) };
                self.state.store(READY, Ordering::Release);
                true
            }
            None => {
                self.state.store(EMPTY, Ordering::Release);
                false
            }
        }
    }

    fn wait_ready(&self) -> &T {
        while !self.is_initialized() {
            spin_loop();
        }
        unsafe { self.value_unchecked() }
    }

    /// # Safety
    /// The state must be `READY`.
    unsafe fn value_unchecked(&self) -> &T {
        unsafe { (*self.value.get()).assume_init_ref() }
    }
}

impl<T> Drop for SyncOnceCell<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == READY {
            unsafe { self.value.get_mut().assume_init_drop() };
        }
    }
}

// Safety: shared after READY; initialization is single-writer.
unsafe impl<T: Send + Sync> Sync for SyncOnceCell<T> {}
unsafe impl<T: Send> Send for SyncOnceCell<T> {}
