//! Per-lane run queue for split invocation ranges.
//!
//! ## Purpose
//! A worker lane executing a multi-invocation tile publishes the untouched
//! tail of its range here so that idle lanes can pick it up. The queue is a
//! fixed-capacity ring: single producer (the owning lane), multiple
//! consumers (the owner and any stealing lane).
//!
//! ## Counters
//! Three monotonically advancing 32-bit counters describe the ring:
//!
//! - `tail` counts ranges published,
//! - `head` counts claims,
//! - `correction` offsets `head` for claims that were rolled back.
//!
//! The emptiness probe is `(head - correction) >= tail` under wrap-around,
//! evaluated with the half-space trick `a - b <= 2^31`. The probe never
//! touches slot contents, so a lane can ask "could anyone still find work
//! here?" without draining anything. Claims advance `head` with a
//! compare-exchange, which cannot run past the published tail, so
//! `correction` only moves when the owner resets the queue; it
//! participates in the probe identity regardless.
//!
//! ## Slot handshake
//! Each slot carries a sequence word: the producer publishes a range by
//! storing the slot's position, and a consumer retires the slot by storing
//! `position + capacity`, which is exactly the value the producer expects
//! to see one lap later. The handshake keeps a slow consumer's read from
//! racing a fast producer's overwrite.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::engine::types::{ge_wrapped, RUN_QUEUE_SIZE};

/// A contiguous span of node invocations published for other lanes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SplitRange {
    /// Index of the node in the sorted graph.
    pub node_idx: u32,
    /// First invocation index of the span.
    pub base: u32,
    /// Number of invocations in the span. Always nonzero.
    pub count: u32,
}

struct QueueSlot {
    seq: AtomicU32,
    range: UnsafeCell<SplitRange>,
}

/// Single-producer/multi-consumer ring of [`SplitRange`]s.
pub struct RunQueue {
    head: AtomicU32,
    correction: AtomicU32,
    tail: AtomicU32,
    slots: Box<[QueueSlot]>,
}

unsafe impl Send for RunQueue {}
unsafe impl Sync for RunQueue {}

const MASK: u32 = RUN_QUEUE_SIZE as u32 - 1;

impl RunQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        let slots: Box<[QueueSlot]> = (0..RUN_QUEUE_SIZE as u32)
            .map(|i| QueueSlot {
                seq: AtomicU32::new(i),
                range: UnsafeCell::new(SplitRange {
                    node_idx: 0,
                    base: 0,
                    count: 0,
                }),
            })
            .collect();
        RunQueue {
            head: AtomicU32::new(0),
            correction: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            slots,
        }
    }

    /// Emptiness probe.
    ///
    /// Reports whether every published range has been claimed. Consumes
    /// nothing; the answer may be stale by the time it is acted on, which
    /// is fine for its one use (deciding whether a lane should split).
    #[inline]
    pub fn is_empty(&self) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let correction = self.correction.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        ge_wrapped(head.wrapping_sub(correction), tail)
    }

    /// Publishes a range. Owner lane only.
    ///
    /// Returns `false` without publishing when the ring is full or the
    /// slot for this position has a consumer still draining it from the
    /// previous lap; the caller keeps the range and runs it inline.
    pub fn push(&self, range: SplitRange) -> bool {
        debug_assert!(range.count > 0);
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        let correction = self.correction.load(Ordering::Relaxed);

        let claimed = head.wrapping_sub(correction);
        if tail.wrapping_sub(claimed) >= RUN_QUEUE_SIZE as u32 {
            return false;
        }

        let slot = &self.slots[(tail & MASK) as usize];
        if slot.seq.load(Ordering::Acquire) != tail {
            return false;
        }

        unsafe { *slot.range.get() = range };
        slot.seq.store(tail.wrapping_add(1), Ordering::Release);
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    /// Claims one range. Any lane.
    pub fn pop(&self) -> Option<SplitRange> {
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            let correction = self.correction.load(Ordering::Relaxed);
            let pos = self.head.load(Ordering::Relaxed);

            if ge_wrapped(pos.wrapping_sub(correction), tail) {
                return None;
            }

            let slot = &self.slots[(pos & MASK) as usize];
            if slot.seq.load(Ordering::Acquire) != pos.wrapping_add(1) {
                // Published but another consumer is mid-claim, or the load
                // of `head` is stale. Re-read and retry.
                std::hint::spin_loop();
                continue;
            }

            if self
                .head
                .compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                let range = unsafe { *slot.range.get() };
                // Retire the slot for the producer's next lap.
                slot.seq.store(
                    pos.wrapping_add(RUN_QUEUE_SIZE as u32),
                    Ordering::Release,
                );
                return Some(range);
            }
        }
    }

    /// Reinitializes all counters. Owner lane only, and only while no
    /// other lane can touch the queue (between ticks).
    pub fn reset(&self) {
        self.head.store(0, Ordering::Relaxed);
        self.correction.store(0, Ordering::Relaxed);
        self.tail.store(0, Ordering::Relaxed);
        for (i, slot) in self.slots.iter().enumerate() {
            slot.seq.store(i as u32, Ordering::Relaxed);
        }
    }
}

impl Default for RunQueue {
    fn default() -> Self {
        Self::new()
    }
}
