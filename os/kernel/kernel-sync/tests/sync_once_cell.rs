use kernel_sync::SyncOnceCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn empty_until_set() {
    let cell = SyncOnceCell::<u32>::new();
    assert!(!cell.is_initialized());
    assert_eq!(cell.get(), None);

    assert_eq!(cell.get_or_init(|| 7), &7);
    assert!(cell.is_initialized());
    assert_eq!(cell.get_or_init(|| 8), &7);
    assert_eq!(cell.set(9), Err(9));
}

#[test]
fn racing_initializers_run_exactly_once() {
    let threads = 8;
    let runs = Arc::new(AtomicUsize::new(0));
    let cell = Arc::new(SyncOnceCell::<usize>::new());
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let runs = Arc::clone(&runs);
            let cell = Arc::clone(&cell);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                *cell.get_or_init(|| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    i
                })
            })
        })
        .collect();

    let seen: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(seen.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn stored_value_is_dropped_with_the_cell() {
    let tracker = Arc::new(());
    {
        let cell = SyncOnceCell::new();
        assert!(cell.set(Arc::clone(&tracker)).is_ok());
        assert_eq!(Arc::strong_count(&tracker), 2);
    }
    assert_eq!(Arc::strong_count(&tracker), 1);
}
