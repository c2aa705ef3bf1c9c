use kernel_sync::{RawSpin, SpinLock};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::{panic, thread};

#[test]
fn basic_lock_and_raii() {
    let l = SpinLock::new(0_u32);

    // take the lock, mutate, and drop
    {
        let mut g = l.lock();
        *g = 41;
        assert!(l.is_locked());
    }
    assert!(!l.is_locked());

    // lock again; previous drop must have unlocked
    {
        let mut g = l.lock();
        *g += 1;
        assert_eq!(*g, 42);
    }
}

#[test]
fn try_lock_semantics() {
    let l = SpinLock::new(1u8);

    let g1 = l.try_lock();
    assert!(g1.is_some());
    assert_eq!(**g1.as_ref().unwrap(), 1);

    // while held, try_lock must fail
    assert!(l.try_lock().is_none());

    drop(g1);
    assert!(l.try_lock().is_some());
}

#[test]
fn with_lock_returns_closure_value() {
    let l = SpinLock::new(String::from("a"));
    let len = l.with_lock(|s| {
        s.push('b');
        s.len()
    });
    assert_eq!(len, 2);
    assert_eq!(l.with_lock(|s| s.clone()), "ab");
}

#[test]
fn get_mut_and_into_inner_bypass_the_lock() {
    let mut l = SpinLock::new(vec![1, 2, 3]);
    l.get_mut().push(4);
    assert_eq!(l.lock().as_slice(), &[1, 2, 3, 4]);
    assert_eq!(l.into_inner(), vec![1, 2, 3, 4]);
}

#[test]
fn lock_irq_derefs_to_the_value() {
    let l = SpinLock::new(5_u64);
    {
        let mut g = l.lock_irq();
        *g *= 2;
        assert!(l.is_locked());
    }
    assert!(!l.is_locked());
    assert_eq!(*l.lock(), 10);
}

/// A counter that is deliberately not atomic: only the lock keeps it exact.
struct Unsynchronized(UnsafeCell<usize>);

unsafe impl Sync for Unsynchronized {}

#[test]
fn lock_alone_keeps_a_plain_counter_exact() {
    let threads = 8;
    let iters = 5_000;

    let lock = Arc::new(SpinLock::new(()));
    let counter = Arc::new(Unsynchronized(UnsafeCell::new(0)));
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let counter = Arc::clone(&counter);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..iters {
                    let _g = lock.lock();
                    // Split read and write so an unprotected race would lose updates.
                    let v = unsafe { std::ptr::read_volatile(counter.0.get()) };
                    unsafe { std::ptr::write_volatile(counter.0.get(), v + 1) };
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let _g = lock.lock();
    assert_eq!(unsafe { *counter.0.get() }, threads * iters);
}

#[test]
fn contended_increments_are_exact_and_exclusive() {
    let threads = 8; // keep small for determinism
    let iters = 5_000;

    let lock = Arc::new(SpinLock::new(0usize));
    let in_cs = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(threads));

    let mut handles = Vec::with_capacity(threads);
    for _ in 0..threads {
        let lock = Arc::clone(&lock);
        let in_cs = Arc::clone(&in_cs);
        let start = Arc::clone(&start);
        handles.push(thread::spawn(move || {
            start.wait();
            for _ in 0..iters {
                lock.with_lock(|v| {
                    let prev = in_cs.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(prev, 0, "mutual exclusion violated");
                    *v += 1;
                    in_cs.fetch_sub(1, Ordering::SeqCst);
                });

                // yield only AFTER releasing the lock to reduce convoy effects
                thread::yield_now();
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(lock.with_lock(|v| *v), threads * iters);
    assert_eq!(in_cs.load(Ordering::SeqCst), 0);
}

#[test]
fn lock_is_released_on_panic() {
    let l = SpinLock::new(0u32);

    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        l.with_lock(|v| {
            *v = 123;
            panic!("boom");
        });
    }));
    assert!(res.is_err(), "expected panic");

    assert_eq!(l.with_lock(|v| *v), 123);
}

#[test]
fn explicit_raw_lock_matches_default() {
    let l: SpinLock<u8, RawSpin> = SpinLock::from_raw(RawSpin::new(), 9);
    assert_eq!(*l.lock(), 9);
}

/// Spot-check a concrete instantiation compiles as Sync.
#[test]
fn spinlock_is_sync_for_send_t() {
    fn takes_sync<S: Sync>(_s: &S) {}
    let l = SpinLock::new(0u8);
    takes_sync(&l);
}

#[cfg(feature = "hosted")]
mod yielding {
    use super::*;
    use kernel_sync::RawYield;

    #[test]
    fn yielding_lock_is_a_drop_in_replacement() {
        let threads = 16; // more threads than cores is the point
        let iters = 1_000;

        let lock = Arc::new(SpinLock::from_raw(RawYield::new(), 0usize));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    for _ in 0..iters {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), threads * iters);
    }
}
