use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

use batch_engine::{RunQueue, SplitRange};

fn range(node_idx: u32, base: u32, count: u32) -> SplitRange {
    SplitRange {
        node_idx,
        base,
        count,
    }
}

#[test]
fn starts_empty() {
    let queue = RunQueue::new();
    assert!(queue.is_empty());
    assert_eq!(queue.pop(), None);
}

#[test]
fn probe_reports_empty_after_push_pop() {
    let queue = RunQueue::new();

    assert!(queue.push(range(3, 100, 8)));
    assert!(!queue.is_empty());

    assert_eq!(queue.pop(), Some(range(3, 100, 8)));
    assert!(queue.is_empty());
    assert_eq!(queue.pop(), None);
}

#[test]
fn pops_in_push_order() {
    let queue = RunQueue::new();
    for i in 0..16 {
        assert!(queue.push(range(0, i * 10, 1)));
    }
    for i in 0..16 {
        assert_eq!(queue.pop(), Some(range(0, i * 10, 1)));
    }
    assert!(queue.is_empty());
}

#[test]
fn rejects_push_when_full() {
    let queue = RunQueue::new();
    let capacity = batch_engine::engine::types::RUN_QUEUE_SIZE as u32;

    for i in 0..capacity {
        assert!(queue.push(range(0, i, 1)));
    }
    assert!(!queue.push(range(0, capacity, 1)));

    assert_eq!(queue.pop(), Some(range(0, 0, 1)));
    assert!(queue.push(range(0, capacity, 1)));
}

#[test]
fn survives_counter_wraparound() {
    let queue = RunQueue::new();
    let laps = batch_engine::engine::types::RUN_QUEUE_SIZE as u32 * 5;

    for i in 0..laps {
        assert!(queue.push(range(1, i, 2)));
        assert_eq!(queue.pop(), Some(range(1, i, 2)));
        assert!(queue.is_empty());
    }
}

#[test]
fn concurrent_consumers_claim_each_range_once() {
    const NUM_RANGES: u32 = 20_000;
    const NUM_THIEVES: usize = 4;

    let queue = Arc::new(RunQueue::new());
    let claimed: Arc<Vec<AtomicU32>> =
        Arc::new((0..NUM_RANGES).map(|_| AtomicU32::new(0)).collect());
    let done = Arc::new(AtomicU32::new(0));

    let mut thieves = Vec::new();
    for _ in 0..NUM_THIEVES {
        let queue = Arc::clone(&queue);
        let claimed = Arc::clone(&claimed);
        let done = Arc::clone(&done);
        thieves.push(thread::spawn(move || loop {
            if let Some(taken) = queue.pop() {
                claimed[taken.base as usize].fetch_add(1, Ordering::Relaxed);
            } else if done.load(Ordering::Acquire) == 1 && queue.is_empty() {
                return;
            }
        }));
    }

    // Single producer; retry while consumers drain a full ring.
    for i in 0..NUM_RANGES {
        while !queue.push(range(7, i, 1)) {
            thread::yield_now();
        }
    }
    done.store(1, Ordering::Release);

    for thief in thieves {
        thief.join().unwrap();
    }

    for (i, count) in claimed.iter().enumerate() {
        assert_eq!(count.load(Ordering::Relaxed), 1, "range {} claim count", i);
    }
}
