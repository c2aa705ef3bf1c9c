use kernel_sync::{RawLock, RawSpin, RawUnlock};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn starts_unlocked() {
    let l = RawSpin::new();
    assert!(!l.is_locked());
    assert!(!RawSpin::default().is_locked());
}

#[test]
fn acquire_release_cycle() {
    let l = RawSpin::new();
    l.acquire();
    assert!(l.is_locked());
    assert!(!l.try_acquire());
    unsafe { l.release() };
    assert!(!l.is_locked());
    assert!(l.try_acquire());
    unsafe { l.release() };
}

#[test]
fn trait_seam_drives_the_same_word() {
    let l = RawSpin::new();
    l.raw_lock();
    assert!(l.raw_is_locked());
    assert!(!l.raw_try_lock());
    unsafe { l.raw_unlock() };
    assert!(!l.raw_is_locked());
}

#[test]
fn waiter_proceeds_after_release() {
    let l = Arc::new(RawSpin::new());
    l.acquire();

    let waiter = {
        let l = Arc::clone(&l);
        thread::spawn(move || {
            l.acquire();
            unsafe { l.release() };
        })
    };

    thread::sleep(Duration::from_millis(20));
    assert!(!waiter.is_finished(), "waiter got in while the lock was held");
    unsafe { l.release() };
    waiter.join().unwrap();
    assert!(!l.is_locked());
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "not held")]
fn double_release_is_caught_in_debug_builds() {
    let l = RawSpin::new();
    l.acquire();
    unsafe {
        l.release();
        l.release();
    }
}
