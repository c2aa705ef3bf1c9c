use kernel_sync::AtomicCounter;
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn concurrent_increments_are_never_lost() {
    let threads = 8;
    let iters = 10_000;

    let counter = Arc::new(AtomicCounter::zero());
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let counter = Arc::clone(&counter);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..iters {
                    counter.increment();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(counter.get(), (threads * iters) as u64);
}

#[test]
fn mixed_add_and_sub_balance_out() {
    let threads = 4;
    let iters = 5_000;

    let counter = Arc::new(AtomicCounter::new(1_000));
    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                for _ in 0..iters {
                    if i % 2 == 0 {
                        counter.add(3);
                    } else {
                        counter.sub(3);
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(counter.get(), 1_000);
}

#[test]
fn decrement_below_zero_wraps() {
    let counter = AtomicCounter::zero();
    assert_eq!(counter.decrement(), u64::MAX);
    assert_eq!(counter.increment(), 0);
}
