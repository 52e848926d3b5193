//! # Generational ID Map
//!
//! A concurrent allocator of stable `(generation, index)` handles backed by
//! a slot store with cache-friendly recycling.
//!
//! ## Purpose
//! The engine hands out handles for entities and job trackers from maps of
//! this type. The map is responsible for:
//!
//! - Allocating dense slot indices with stable addresses
//! - Tracking slot liveness via generation counters
//! - Recycling released indices through per-worker caches
//! - Expanding the slot store in fixed-size blocks, never shrinking
//!
//! ## Recycling model
//! Free slots live in **sublists** threaded through the slots themselves.
//! Each worker owns an [`IdMapCache`] holding two small sublists:
//!
//! - a *primary* sublist of up to `C` indices, refilled in bulk,
//! - an *overflow* sublist of up to `C` indices that absorbs release bursts.
//!
//! When the overflow sublist reaches exactly `C` entries it is pushed onto
//! the **global free chain** in one compare-exchange; when both sublists are
//! empty an acquire pops one full sublist back off the chain. Every sublist
//! on the chain is exactly `C` long, so refills and flushes move whole
//! cache-sized batches and the chain head is the only contended word.
//!
//! ## The link field
//! Each slot carries a `global_next` word whose meaning depends on where the
//! slot currently sits:
//!
//! - On the global chain, the head slot's `global_next` *points* at the next
//!   sublist head.
//! - Inside a worker cache, `global_next` is a *count* of contiguous free
//!   indices starting at this slot. Freshly expanded blocks enter a cache as
//!   one slot carrying the whole block's count, so the remaining `C - 1`
//!   slots are never touched until actually handed out.
//!
//! Contiguous blocks never appear on the global chain, which is what makes
//! the overload unambiguous.
//!
//! ## Concurrency
//! - Caches are strictly worker-local; methods take `&mut IdMapCache`.
//! - The global chain head packs a `{gen, head}` pair into one `AtomicU64`
//!   mutated only by 64-bit compare-exchange. The generation half makes the
//!   pop race ABA-safe for the lifetime of any in-flight acquire.
//! - Store expansion happens under a lock; readers see new blocks through
//!   release/acquire publication of the chunk pointer and capacity.
//!
//! ## Failure modes
//! Exceeding the configured slot ceiling aborts with a
//! [`StoreCapacityError`] diagnostic. Releasing a stale handle is a caller
//! contract violation with unspecified results.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::engine::error::StoreCapacityError;
use crate::engine::types::{Handle, Id, IDS_PER_CACHE};

/// Terminator index for free sublists.
const FREE_LIST_END: u32 = !0u32;

/// Default ceiling on the number of slots a map may grow to.
pub const DEFAULT_ID_CEILING: u32 = 1 << 22;

union SlotData<V: Copy> {
    live: V,
    sub_next: u32,
}

/// One slot of the store: a generation counter, the dual-meaning link word,
/// and the value/free-link union.
///
/// The union is untagged. Which variant is active is implied by list
/// membership: a slot reachable from a free sublist holds `sub_next`, every
/// other slot holds `live`. The generation counter is incremented once per
/// release, so any handle issued before the release no longer matches.
struct Slot<V: Copy> {
    gen: AtomicU32,
    global_next: AtomicU32,
    data: UnsafeCell<SlotData<V>>,
}

impl<V: Copy> Slot<V> {
    fn new_free() -> Self {
        Slot {
            gen: AtomicU32::new(0),
            global_next: AtomicU32::new(1),
            data: UnsafeCell::new(SlotData {
                sub_next: FREE_LIST_END,
            }),
        }
    }

    /// # Safety
    /// The slot must be free and the caller must be its exclusive owner
    /// (cache owner or successful chain popper).
    #[inline]
    unsafe fn sub_next(&self) -> u32 {
        unsafe { (*self.data.get()).sub_next }
    }

    /// # Safety
    /// As [`Slot::sub_next`].
    #[inline]
    unsafe fn set_sub_next(&self, next: u32) {
        unsafe { (*self.data.get()).sub_next = next };
    }

    /// # Safety
    /// The caller must be transitioning the slot to live with exclusive
    /// ownership of its contents.
    #[inline]
    unsafe fn set_live(&self, value: V) {
        unsafe { (*self.data.get()).live = value };
    }

    /// # Safety
    /// The slot must be live.
    #[inline]
    unsafe fn live(&self) -> &V {
        unsafe { &(*self.data.get()).live }
    }
}

/// Chunked slot storage with stable addresses.
///
/// Slots are allocated in blocks of `C` published through an atomic pointer
/// table, so a slot reference obtained from any thread stays valid while
/// the map exists. Expansion appends blocks and never moves or frees them
/// before the store is dropped.
struct SlotStore<V: Copy, const C: u32> {
    chunks: Box<[AtomicPtr<Slot<V>>]>,
    capacity: AtomicU32,
    ceiling: u32,
}

impl<V: Copy, const C: u32> SlotStore<V, C> {
    fn new(init_capacity: u32, ceiling: u32) -> Self {
        let num_chunks = (ceiling / C) as usize;
        let chunks: Box<[AtomicPtr<Slot<V>>]> = (0..num_chunks)
            .map(|_| AtomicPtr::new(std::ptr::null_mut()))
            .collect();
        let store = SlotStore {
            chunks,
            capacity: AtomicU32::new(0),
            ceiling,
        };
        for _ in 0..init_capacity / C {
            store.expand_locked();
        }
        store
    }

    fn alloc_chunk() -> *mut Slot<V> {
        let chunk: Box<[Slot<V>]> = (0..C).map(|_| Slot::new_free()).collect();
        Box::into_raw(chunk) as *mut Slot<V>
    }

    /// Appends one block of `C` slots and returns the block's base index.
    ///
    /// Must be called with the map's expand lock held (or during
    /// construction, before the store is shared).
    fn expand_locked(&self) -> u32 {
        let cur = self.capacity.load(Ordering::Relaxed);
        let requested = cur as u64 + C as u64;
        if requested > self.ceiling as u64 {
            panic!(
                "{}",
                StoreCapacityError {
                    requested,
                    ceiling: self.ceiling as u64,
                }
            );
        }
        let chunk_idx = (cur / C) as usize;
        self.chunks[chunk_idx].store(Self::alloc_chunk(), Ordering::Release);
        self.capacity.store(cur + C, Ordering::Release);
        cur
    }

    #[inline]
    fn slot(&self, id: Id) -> &Slot<V> {
        let chunk = self.chunks[(id / C) as usize].load(Ordering::Acquire);
        debug_assert!(!chunk.is_null(), "slot index {} out of bounds", id);
        unsafe { &*chunk.add((id % C) as usize) }
    }
}

impl<V: Copy, const C: u32> Drop for SlotStore<V, C> {
    fn drop(&mut self) {
        let capacity = self.capacity.load(Ordering::Relaxed);
        for chunk_idx in 0..(capacity / C) as usize {
            let ptr = self.chunks[chunk_idx].load(Ordering::Relaxed);
            if !ptr.is_null() {
                let slice = std::ptr::slice_from_raw_parts_mut(ptr, C as usize);
                drop(unsafe { Box::from_raw(slice) });
            }
        }
    }
}

/// Worker-local recycling cache for one [`IdMap`].
///
/// ## Purpose
/// Holds the primary and overflow free sublists a worker draws from before
/// touching the global chain. Acquire and release operate on the cache
/// without any atomic read-modify-write in the common case.
///
/// ## Invariants
/// - Each sublist holds at most `C` indices (the map's sublist length).
/// - A cache is bound to the map it was used with; mixing caches across
///   maps corrupts both free lists.
///
/// ## Concurrency
/// Not thread-safe by design: every worker owns exactly one cache per map
/// and passes it by `&mut`.
#[derive(Debug)]
pub struct IdMapCache {
    free_head: u32,
    num_free_ids: u32,
    overflow_head: u32,
    num_overflow_ids: u32,
}

impl IdMapCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        IdMapCache {
            free_head: FREE_LIST_END,
            num_free_ids: 0,
            overflow_head: FREE_LIST_END,
            num_overflow_ids: 0,
        }
    }

    /// Number of indices currently parked in this cache.
    #[inline]
    pub fn num_cached(&self) -> u32 {
        self.num_free_ids + self.num_overflow_ids
    }
}

impl Default for IdMapCache {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
const fn pack_head(gen: u32, head: u32) -> u64 {
    ((gen as u64) << 32) | head as u64
}

#[inline]
const fn head_parts(raw: u64) -> (u32, u32) {
    ((raw >> 32) as u32, raw as u32)
}

const _: [(); 1] = [(); (IDS_PER_CACHE == 64) as usize];

/// Concurrent generational map from [`Handle`] to `V`.
///
/// See the module documentation for the recycling model. `V` is plain
/// copyable data (the engine stores location records and job trackers),
/// which keeps slot transitions free of destructor concerns. The sublist
/// length `C` defaults to [`IDS_PER_CACHE`].
pub struct IdMap<V: Copy, const C: u32 = 64> {
    free_head: AtomicU64,
    store: SlotStore<V, C>,
    expand_lock: Mutex<()>,
    num_live: AtomicU32,
}

unsafe impl<V: Copy + Send, const C: u32> Send for IdMap<V, C> {}
unsafe impl<V: Copy + Send + Sync, const C: u32> Sync for IdMap<V, C> {}

impl<V: Copy, const C: u32> IdMap<V, C> {
    /// Creates a map with the given initial capacity and the default slot
    /// ceiling.
    ///
    /// ## Panics
    /// Panics if `init_capacity` is not a multiple of the sublist length.
    pub fn new(init_capacity: u32) -> Self {
        Self::with_ceiling(init_capacity, DEFAULT_ID_CEILING)
    }

    /// Creates a map with an explicit slot ceiling.
    ///
    /// The initial slots are threaded into full sublists on the global free
    /// chain, exactly as they will circulate for the rest of the map's
    /// lifetime.
    ///
    /// ## Panics
    /// Panics if `init_capacity` or `ceiling` is not a multiple of the
    /// sublist length, or if the ceiling is smaller than the initial
    /// capacity.
    pub fn with_ceiling(init_capacity: u32, ceiling: u32) -> Self {
        assert!(C >= 2, "sublist length must be at least 2");
        assert!(
            init_capacity % C == 0,
            "initial capacity {} must be a multiple of the sublist length {}",
            init_capacity,
            C
        );
        assert!(
            ceiling % C == 0 && ceiling >= init_capacity && ceiling >= C,
            "ceiling {} must be a multiple of {} and at least the initial capacity",
            ceiling,
            C
        );

        let store = SlotStore::<V, C>::new(init_capacity, ceiling);

        for base in (0..init_capacity).step_by(C as usize) {
            for i in 0..C - 1 {
                let idx = base + i;
                let slot = store.slot(idx);
                unsafe { slot.set_sub_next(idx + 1) };
                if i == 0 {
                    let next_block = if base + C < init_capacity {
                        base + C
                    } else {
                        FREE_LIST_END
                    };
                    slot.global_next.store(next_block, Ordering::Relaxed);
                } else {
                    slot.global_next.store(1, Ordering::Relaxed);
                }
            }
            let last = store.slot(base + C - 1);
            unsafe { last.set_sub_next(FREE_LIST_END) };
            last.global_next.store(1, Ordering::Relaxed);
        }

        let head = if init_capacity > 0 { 0 } else { FREE_LIST_END };
        IdMap {
            free_head: AtomicU64::new(pack_head(0, head)),
            store,
            expand_lock: Mutex::new(()),
            num_live: AtomicU32::new(0),
        }
    }

    /// Number of live values currently stored.
    ///
    /// The count is maintained with relaxed atomics and is exact only at
    /// quiescent points.
    #[inline]
    pub fn num_live(&self) -> u32 {
        self.num_live.load(Ordering::Relaxed)
    }

    /// Current slot capacity of the backing store.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.store.capacity.load(Ordering::Acquire)
    }

    /// Pops the head of a cached sublist, stores `value` in it, and returns
    /// the handle.
    ///
    /// When the head slot's link word carries a contiguous count greater
    /// than one, the next index in the block is materialized as the new
    /// sublist head with the count reduced by one. This is what lets a
    /// freshly expanded block sit in the cache as a single entry.
    fn assign_cached_id(&self, head: &mut u32, value: V) -> Handle {
        let new_id = *head;
        let slot = self.store.slot(new_id);

        let num_contiguous = slot.global_next.load(Ordering::Relaxed);
        if num_contiguous == 1 {
            *head = unsafe { slot.sub_next() };
        } else {
            let next_free = new_id + 1;
            let next_slot = self.store.slot(next_free);
            unsafe { next_slot.set_sub_next(slot.sub_next()) };
            next_slot.global_next
                .store(num_contiguous - 1, Ordering::Relaxed);
            next_slot.gen.store(0, Ordering::Relaxed);
            *head = next_free;
        }

        let gen = slot.gen.load(Ordering::Relaxed);
        unsafe { slot.set_live(value) };
        Handle::new(gen, new_id)
    }

    /// Allocates a fresh handle holding `value`.
    ///
    /// ## Behavior
    /// Sources, in order: the overflow sublist, the primary sublist, one
    /// full sublist popped from the global chain, and finally a new block
    /// from store expansion.
    ///
    /// ## Panics
    /// Panics with a [`StoreCapacityError`] diagnostic if expansion would
    /// exceed the configured ceiling.
    pub fn acquire(&self, cache: &mut IdMapCache, value: V) -> Handle {
        self.num_live.fetch_add(1, Ordering::Relaxed);

        if cache.num_overflow_ids > 0 {
            cache.num_overflow_ids -= 1;
            return self.assign_cached_id(&mut cache.overflow_head, value);
        }

        if cache.num_free_ids > 0 {
            cache.num_free_ids -= 1;
            return self.assign_cached_id(&mut cache.free_head, value);
        }

        // Refill: pop one full sublist off the global chain.
        let mut cur = self.free_head.load(Ordering::Acquire);
        let popped = loop {
            let (gen, head) = head_parts(cur);
            if head == FREE_LIST_END {
                break None;
            }
            // Speculative read; discarded when the exchange fails.
            let next = self.store.slot(head).global_next.load(Ordering::Relaxed);
            let new = pack_head(gen.wrapping_add(1), next);
            match self.free_head.compare_exchange_weak(
                cur,
                new,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => break Some(head),
                Err(actual) => cur = actual,
            }
        };

        if let Some(head) = popped {
            // Back in a cache the link word switches to its count meaning;
            // chain sublists are never contiguous, so every entry counts 1.
            self.store.slot(head).global_next.store(1, Ordering::Relaxed);
            cache.free_head = head;
            cache.num_free_ids = C - 1;
            return self.assign_cached_id(&mut cache.free_head, value);
        }

        // Chain exhausted: expand the store by one block. The first index
        // is returned live; the rest enter the primary sublist as one
        // contiguous entry.
        let block_start = {
            let _guard = self.expand_lock.lock().unwrap();
            self.store.expand_locked()
        };

        let first_id = block_start;
        unsafe { self.store.slot(first_id).set_live(value) };

        let free_start = block_start + 1;
        let next_slot = self.store.slot(free_start);
        unsafe { next_slot.set_sub_next(FREE_LIST_END) };
        next_slot.global_next.store(C - 1, Ordering::Relaxed);

        cache.free_head = free_start;
        cache.num_free_ids = C - 1;

        Handle::new(0, first_id)
    }

    /// Retires a handle, invalidating it and recycling its index.
    ///
    /// ## Behavior
    /// - Increments the slot generation, so the handle no longer matches.
    /// - Parks the index in the primary sublist, or the overflow sublist if
    ///   the primary is full.
    /// - When the overflow sublist reaches exactly `C` entries, pushes the
    ///   whole sublist onto the global chain in one tagged exchange.
    ///
    /// ## Contract
    /// `handle` must be valid. Releasing a stale or foreign handle corrupts
    /// the free lists.
    pub fn release(&self, cache: &mut IdMapCache, handle: Handle) {
        let id = handle.id();
        let slot = self.store.slot(id);

        let next_gen = slot.gen.load(Ordering::Relaxed).wrapping_add(1);
        slot.gen.store(next_gen, Ordering::Relaxed);
        slot.global_next.store(1, Ordering::Relaxed);
        self.num_live.fetch_sub(1, Ordering::Relaxed);

        if cache.num_free_ids < C {
            unsafe { slot.set_sub_next(cache.free_head) };
            cache.free_head = id;
            cache.num_free_ids += 1;
            return;
        }

        if cache.num_overflow_ids < C {
            unsafe { slot.set_sub_next(cache.overflow_head) };
            cache.overflow_head = id;
            cache.num_overflow_ids += 1;
        }

        if cache.num_overflow_ids == C {
            self.push_global_chain(cache.overflow_head, cache.overflow_head);
            cache.overflow_head = FREE_LIST_END;
            cache.num_overflow_ids = 0;
        }
    }

    /// Retires a batch of handles in one pass.
    ///
    /// ## Behavior
    /// The batch is carved into full `C`-sized sublists linked tail-to-head
    /// and spliced onto the global chain under a single tagged exchange.
    /// The remainder that does not fill a sublist is absorbed into the
    /// overflow cache; if it does not fit, enough of the old overflow ids
    /// are re-threaded onto the remainder to complete one more full sublist
    /// for the chain.
    ///
    /// ## Contract
    /// Every handle in `handles` must be valid and distinct.
    pub fn bulk_release(&self, cache: &mut IdMapCache, handles: &[Handle]) {
        let num_keys = handles.len();
        if num_keys == 0 {
            return;
        }
        self.num_live
            .fetch_sub(num_keys as u32, Ordering::Relaxed);

        let retire_to = |idx: usize, sub_next: u32| {
            let slot = self.store.slot(handles[idx].id());
            let next_gen = slot.gen.load(Ordering::Relaxed).wrapping_add(1);
            slot.gen.store(next_gen, Ordering::Relaxed);
            slot.global_next.store(1, Ordering::Relaxed);
            unsafe { slot.set_sub_next(sub_next) };
        };

        let c = C as usize;
        let mut base = 0usize;
        let mut chain_tail: Option<u32> = None;

        while num_keys - base >= c {
            let head_id = handles[base].id();
            for sub in 0..c - 1 {
                retire_to(base + sub, handles[base + sub + 1].id());
            }
            retire_to(base + c - 1, FREE_LIST_END);

            if let Some(tail) = chain_tail {
                self.store
                    .slot(tail)
                    .global_next
                    .store(head_id, Ordering::Relaxed);
            }
            chain_tail = Some(head_id);
            base += c;
        }

        // The final chunk has an odd size the overflow cache absorbs.
        if base < num_keys {
            let rem = num_keys - base;
            let start_id = handles[base].id();
            for idx in base..num_keys - 1 {
                retire_to(idx, handles[idx + 1].id());
            }
            retire_to(num_keys - 1, cache.overflow_head);

            let num_from_overflow = c - rem;
            if (cache.num_overflow_ids as usize) < num_from_overflow {
                cache.overflow_head = start_id;
                cache.num_overflow_ids += rem as u32;
            } else {
                // Complete one full sublist with ids taken from the old
                // overflow list, then cut it loose.
                let mut next_id = cache.overflow_head;
                let mut last_taken = FREE_LIST_END;
                for _ in 0..num_from_overflow {
                    last_taken = next_id;
                    next_id = unsafe { self.store.slot(next_id).sub_next() };
                }
                unsafe { self.store.slot(last_taken).set_sub_next(FREE_LIST_END) };
                cache.overflow_head = next_id;
                cache.num_overflow_ids -= num_from_overflow as u32;

                if let Some(tail) = chain_tail {
                    self.store
                        .slot(tail)
                        .global_next
                        .store(start_id, Ordering::Relaxed);
                }
                chain_tail = Some(start_id);
            }
        }

        if let Some(tail) = chain_tail {
            self.push_global_chain(handles[0].id(), tail);
        }
    }

    /// Returns a reference to the value behind `handle`, or `None` if the
    /// handle is stale or out of range.
    ///
    /// ## Contract
    /// The caller must not release `handle` on another thread while holding
    /// the returned reference; holding a valid handle is what keeps the
    /// slot live.
    pub fn lookup(&self, handle: Handle) -> Option<&V> {
        let id = handle.id();
        if id >= self.store.capacity.load(Ordering::Acquire) {
            return None;
        }
        let slot = self.store.slot(id);
        if slot.gen.load(Ordering::Acquire) != handle.gen() {
            return None;
        }
        Some(unsafe { slot.live() })
    }

    /// Splices a pre-linked chain of full sublists onto the global chain.
    ///
    /// `new_head` is the first sublist head of the chain and `tail_head`
    /// the last; for a single sublist they coincide. The tail's link word
    /// is pointed at the old chain head inside the exchange loop so the
    /// splice is one atomic publication.
    fn push_global_chain(&self, new_head: u32, tail_head: u32) {
        let tail_slot = self.store.slot(tail_head);
        let mut cur = self.free_head.load(Ordering::Relaxed);
        loop {
            let (gen, old_head) = head_parts(cur);
            tail_slot.global_next.store(old_head, Ordering::Relaxed);
            let new = pack_head(gen.wrapping_add(1), new_head);
            match self.free_head.compare_exchange_weak(
                cur,
                new,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Raw `{gen, head}` word of the global free chain. Test hook.
    #[doc(hidden)]
    pub fn free_chain_head(&self) -> (u32, u32) {
        head_parts(self.free_head.load(Ordering::Acquire))
    }
}
