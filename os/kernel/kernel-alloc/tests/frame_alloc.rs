mod common;

use common::{Lcg, PHYS_BASE, storage_for};
use kernel_alloc::{AllocError, BitmapFrameAlloc, FrameStats, Status};
use kernel_info::memory::FRAME_SIZE;
use kernel_memory_addresses::PhysicalAddress;
use kernel_sync::RawYield;
use std::sync::Barrier;
use std::thread;

const MIB: u64 = 1024 * 1024;

#[test]
fn sixteen_mib_of_four_kib_frames() {
    let mut storage = storage_for(4096);
    let frames: BitmapFrameAlloc = BitmapFrameAlloc::new(PHYS_BASE, 16 * MIB, &mut storage).unwrap();

    assert_eq!(frames.total_frames(), 4096);
    assert_eq!(frames.total_memory(), 16 * MIB);
    assert_eq!(frames.frame_size(), 4096);
    assert_eq!(frames.stats().free, 4096);

    let pa = frames.alloc_frames(10).unwrap();
    assert_eq!(pa, PHYS_BASE);
    assert_eq!(
        frames.stats(),
        FrameStats {
            total: 4096,
            allocated: 10,
            free: 4086
        }
    );

    frames.free_frames(pa, 10).unwrap();
    assert_eq!(frames.stats().free, 4096);

    let too_many = frames.alloc_frames(5000);
    assert_eq!(too_many, Err(AllocError::OutOfMemory));
    assert_eq!(Status::from_result(&too_many), Status::OutOfMemory);
    assert_eq!(frames.stats().free, 4096);
}

#[test]
fn exhaustion_is_reported_and_recoverable() {
    let mut storage = storage_for(8);
    let frames: BitmapFrameAlloc =
        BitmapFrameAlloc::new(PHYS_BASE, 8 * FRAME_SIZE, &mut storage).unwrap();

    let all: Vec<_> = (0..8).map(|_| frames.alloc_frame().unwrap()).collect();
    assert_eq!(frames.alloc_frame(), Err(AllocError::OutOfMemory));

    frames.free_frames(all[5], 1).unwrap();
    assert_eq!(frames.alloc_frame(), Ok(all[5]));
}

#[test]
fn fragmentation_needs_a_contiguous_run() {
    let mut storage = storage_for(8);
    let frames: BitmapFrameAlloc =
        BitmapFrameAlloc::new(PHYS_BASE, 8 * FRAME_SIZE, &mut storage).unwrap();

    let singles: Vec<_> = (0..8).map(|_| frames.alloc_frame().unwrap()).collect();
    for pa in singles.iter().step_by(2) {
        frames.free_frames(*pa, 1).unwrap();
    }
    assert_eq!(frames.stats().free, 4);
    assert_eq!(frames.alloc_frames(2), Err(AllocError::OutOfMemory));

    frames.free_frames(singles[1], 1).unwrap();
    assert_eq!(frames.alloc_frames(3), Ok(singles[0]));
}

#[test]
fn accounting_matches_a_model_under_random_traffic() {
    const TOTAL: usize = 256;
    let mut storage = storage_for(TOTAL);
    let frames: BitmapFrameAlloc =
        BitmapFrameAlloc::new(PHYS_BASE, TOTAL as u64 * FRAME_SIZE, &mut storage).unwrap();

    let mut model = vec![false; TOTAL];
    let mut live: Vec<(PhysicalAddress, usize)> = Vec::new();
    let mut rng = Lcg::new(0x5eed);

    for _ in 0..2_000 {
        if live.is_empty() || rng.next_below(3) != 0 {
            let count = 1 + rng.next_below(12);
            match frames.alloc_frames(count) {
                Ok(pa) => {
                    let first = ((pa.as_u64() - PHYS_BASE.as_u64()) / FRAME_SIZE) as usize;
                    for used in &mut model[first..first + count] {
                        assert!(!*used, "frame {first} handed out twice");
                        *used = true;
                    }
                    live.push((pa, count));
                }
                Err(AllocError::OutOfMemory) => {
                    let fits = model
                        .windows(count)
                        .any(|w| w.iter().all(|used| !used));
                    assert!(!fits, "reported out of memory with a free run of {count}");
                }
                Err(e) => panic!("unexpected error {e}"),
            }
        } else {
            let (pa, count) = live.swap_remove(rng.next_below(live.len()));
            frames.free_frames(pa, count).unwrap();
            let first = ((pa.as_u64() - PHYS_BASE.as_u64()) / FRAME_SIZE) as usize;
            model[first..first + count].fill(false);
        }

        let stats = frames.stats();
        let used = model.iter().filter(|u| **u).count();
        assert_eq!(stats.allocated, used);
        assert_eq!(stats.allocated + stats.free, stats.total);
        assert_eq!(frames.allocated_frames(), used);
    }
}

#[test]
fn concurrent_leases_never_overlap() {
    const TOTAL: usize = 512;
    const THREADS: usize = 8;

    let mut storage = storage_for(TOTAL);
    let frames: BitmapFrameAlloc<'_, RawYield> =
        BitmapFrameAlloc::new(PHYS_BASE, TOTAL as u64 * FRAME_SIZE, &mut storage).unwrap();
    let start = Barrier::new(THREADS);

    let leases: Vec<(PhysicalAddress, usize)> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let frames = &frames;
                let start = &start;
                s.spawn(move || {
                    start.wait();
                    let mut mine = Vec::new();
                    // Ask for more than fits overall; some requests must fail.
                    for round in 0..40 {
                        let count = 1 + (t + round) % 4;
                        if let Ok(pa) = frames.alloc_frames(count) {
                            mine.push((pa, count));
                        }
                        if round % 5 == 4
                            && let Some((pa, count)) = mine.pop()
                        {
                            frames.free_frames(pa, count).unwrap();
                        }
                    }
                    mine
                })
            })
            .collect();
        handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
    });

    let mut owner = vec![false; TOTAL];
    for (pa, count) in &leases {
        let first = ((pa.as_u64() - PHYS_BASE.as_u64()) / FRAME_SIZE) as usize;
        for used in &mut owner[first..first + count] {
            assert!(!*used, "overlapping leases at frame {first}");
            *used = true;
        }
    }

    let held: usize = leases.iter().map(|(_, c)| c).sum();
    assert!(held <= TOTAL);
    assert_eq!(frames.stats().allocated, held);
}
