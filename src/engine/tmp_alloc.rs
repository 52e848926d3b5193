//! Per-tick temporary bump arena.
//!
//! ## Purpose
//! Node entries need cheap scratch memory whose lifetime is "the rest of
//! this tick". The arena serves that with a single atomic fetch-add per
//! allocation into one large reservation, and a dedicated graph node
//! resets the offset between ticks.
//!
//! ## Reservation and commit
//! The full address range is reserved once at construction and never
//! moves. The arena tracks a *committed* prefix length: an allocation that
//! lands past it takes the grow lock, doubles the committed length
//! (clamped to [1 MiB, 256 MiB] per doubling step, repeating steps until
//! the allocation is covered), and publishes the new length. Racing
//! allocators re-check under the lock and skip the grow when another lane
//! already covered them. Committed length grows monotonically and is only
//! ever trimmed back to the reservation end.
//!
//! On demand-paged hosts the reservation itself costs address space only;
//! physical pages arrive as the committed prefix is first touched. The
//! committed-length bookkeeping is what the engine observes and tests.
//!
//! ## Concurrency
//! Many allocators, one grower at a time. `reset` is safe only between
//! ticks, when no allocation can be in flight.

use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::engine::error::ArenaReserveError;
use crate::engine::types::round_up_pow2;

/// Granularity every allocation is rounded up to.
pub const TMP_ALLOC_GRANULARITY: u64 = 256;

/// Smallest committed-length increase per doubling step.
const MIN_GROW_BYTES: u64 = 1 << 20;

/// Largest committed-length increase per doubling step.
const MAX_GROW_BYTES: u64 = 256 << 20;

/// Tick-scoped bump allocator over one fixed reservation.
pub struct TmpAllocator {
    base: *mut u8,
    reserve_bytes: u64,
    offset: AtomicU64,
    num_mapped_bytes: AtomicU64,
    grow_lock: Mutex<()>,
}

unsafe impl Send for TmpAllocator {}
unsafe impl Sync for TmpAllocator {}

impl TmpAllocator {
    /// Reserves `reserve_bytes` of address range for the arena's lifetime.
    ///
    /// ## Panics
    /// Panics if the reservation is zero, not a multiple of the allocation
    /// granularity, or cannot be reserved.
    pub fn new(reserve_bytes: u64) -> Self {
        assert!(
            reserve_bytes > 0 && reserve_bytes % TMP_ALLOC_GRANULARITY == 0,
            "arena reservation {} must be a positive multiple of {}",
            reserve_bytes,
            TMP_ALLOC_GRANULARITY
        );
        let layout = Layout::from_size_align(
            reserve_bytes as usize,
            TMP_ALLOC_GRANULARITY as usize,
        )
        .expect("arena reservation layout");
        let base = unsafe { alloc(layout) };
        assert!(
            !base.is_null(),
            "failed to reserve {} bytes for the temp arena",
            reserve_bytes
        );
        TmpAllocator {
            base,
            reserve_bytes,
            offset: AtomicU64::new(0),
            num_mapped_bytes: AtomicU64::new(0),
            grow_lock: Mutex::new(()),
        }
    }

    /// Allocates `num_bytes` of tick-scoped scratch memory.
    ///
    /// The size is rounded up to [`TMP_ALLOC_GRANULARITY`]; the returned
    /// block is valid until the next [`reset`](TmpAllocator::reset).
    ///
    /// ## Panics
    /// Panics with an [`ArenaReserveError`] diagnostic when the reservation
    /// is exhausted.
    pub fn alloc(&self, num_bytes: u64) -> NonNull<u8> {
        let size = round_up_pow2(num_bytes.max(1), TMP_ALLOC_GRANULARITY);
        let alloc_offset = self.offset.fetch_add(size, Ordering::Relaxed);
        let end = alloc_offset + size;

        if end > self.reserve_bytes {
            panic!(
                "{}",
                ArenaReserveError {
                    requested_end: end,
                    reserved: self.reserve_bytes,
                }
            );
        }

        if end > self.num_mapped_bytes.load(Ordering::Acquire) {
            let _guard = self.grow_lock.lock().unwrap();
            let cur_mapped = self.num_mapped_bytes.load(Ordering::Relaxed);
            if end > cur_mapped {
                let mut new_mapped = cur_mapped;
                while new_mapped < end {
                    let step = new_mapped.clamp(MIN_GROW_BYTES, MAX_GROW_BYTES);
                    new_mapped += step;
                }
                new_mapped = new_mapped.min(self.reserve_bytes);
                self.num_mapped_bytes.store(new_mapped, Ordering::Release);
            }
        }

        unsafe { NonNull::new_unchecked(self.base.add(alloc_offset as usize)) }
    }

    /// Rewinds the arena to empty.
    ///
    /// Legal only between ticks; allocations handed out before the reset
    /// must no longer be referenced. The committed length is unaffected,
    /// so the next tick reuses it without growing.
    pub fn reset(&self) {
        self.offset.store(0, Ordering::Release);
    }

    /// Current bump offset in bytes.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    /// Current committed prefix length in bytes.
    #[inline]
    pub fn mapped_bytes(&self) -> u64 {
        self.num_mapped_bytes.load(Ordering::Acquire)
    }

    /// Total reserved bytes.
    #[inline]
    pub fn reserve_bytes(&self) -> u64 {
        self.reserve_bytes
    }
}

impl Drop for TmpAllocator {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(
            self.reserve_bytes as usize,
            TMP_ALLOC_GRANULARITY as usize,
        )
        .expect("arena reservation layout");
        unsafe { dealloc(self.base, layout) };
    }
}
