use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use batch_engine::{Handle, IdMap, IdMapCache};

#[test]
fn acquire_returns_distinct_indices() {
    let map: IdMap<u32, 4> = IdMap::with_ceiling(8, 64);
    let mut cache = IdMapCache::new();

    let handles: Vec<Handle> = (0..8).map(|i| map.acquire(&mut cache, i)).collect();
    let ids: HashSet<u32> = handles.iter().map(|h| h.id()).collect();
    assert_eq!(ids.len(), 8);
    assert_eq!(map.num_live(), 8);

    for (i, handle) in handles.iter().enumerate() {
        assert_eq!(map.lookup(*handle), Some(&(i as u32)));
    }
}

#[test]
fn release_round_trip_bumps_generation() {
    let map: IdMap<u32, 4> = IdMap::with_ceiling(8, 64);
    let mut cache = IdMapCache::new();

    let first = map.acquire(&mut cache, 7);
    let slot = first.id();
    map.release(&mut cache, first);

    // The freed index comes straight back off the primary sublist.
    let second = map.acquire(&mut cache, 8);
    assert_eq!(second.id(), slot);
    assert!(second.gen() > first.gen());
    assert_eq!(map.lookup(first), None);
    assert_eq!(map.lookup(second), Some(&8));
}

#[test]
fn release_five_of_eight_reacquires_released_slot() {
    let map: IdMap<u32, 4> = IdMap::with_ceiling(8, 64);
    let mut cache = IdMapCache::new();

    let handles: Vec<Handle> = (0..8).map(|i| map.acquire(&mut cache, i)).collect();
    for handle in &handles[..5] {
        map.release(&mut cache, *handle);
    }
    assert_eq!(map.num_live(), 3);

    // Four releases fill the primary sublist; the fifth lands in overflow
    // and is the first index handed back out.
    let reused = map.acquire(&mut cache, 99);
    assert_eq!(reused.id(), handles[4].id());
    assert!(reused.gen() > 0);
    assert_eq!(map.lookup(reused), Some(&99));
}

#[test]
fn bulk_release_nine_leaves_one_in_overflow() {
    let map: IdMap<u32, 4> = IdMap::with_ceiling(12, 64);
    let mut cache = IdMapCache::new();

    let handles: Vec<Handle> = (0..12).map(|i| map.acquire(&mut cache, i)).collect();
    assert_eq!(map.capacity(), 12);

    map.bulk_release(&mut cache, &handles[..9]);
    assert_eq!(map.num_live(), 3);

    // Two full sublists of four went to the global chain; the odd ninth
    // id sits in this cache's overflow sublist.
    assert_eq!(cache.num_cached(), 1);
    let overflow = map.acquire(&mut cache, 100);
    assert_eq!(overflow.id(), handles[8].id());

    // A foreign cache can only refill from the chain: exactly the eight
    // bulk-released ids come back before the store has to expand.
    let mut other = IdMapCache::new();
    let released: HashSet<u32> = handles[..8].iter().map(|h| h.id()).collect();
    for i in 0..8 {
        let reacquired = map.acquire(&mut other, 200 + i);
        assert!(released.contains(&reacquired.id()));
    }
    assert_eq!(map.capacity(), 12);

    map.acquire(&mut other, 300);
    assert_eq!(map.capacity(), 16);
}

#[test]
fn bulk_release_then_reacquire_reuses_exact_indices() {
    let map: IdMap<u64, 4> = IdMap::with_ceiling(16, 64);
    let mut cache = IdMapCache::new();

    // Exactly three full blocks, so the worker cache is empty before the
    // bulk release.
    let handles: Vec<Handle> = (0..12).map(|i| map.acquire(&mut cache, i)).collect();
    let released: HashSet<u32> = handles[..9].iter().map(|h| h.id()).collect();
    map.bulk_release(&mut cache, &handles[..9]);

    let capacity_before = map.capacity();
    let mut reacquired = HashSet::new();
    for i in 0..9 {
        let handle = map.acquire(&mut cache, 500 + i);
        reacquired.insert(handle.id());
    }
    assert_eq!(reacquired, released);
    assert_eq!(map.capacity(), capacity_before);
}

#[test]
fn store_expands_when_chain_runs_dry() {
    let map: IdMap<u32, 4> = IdMap::with_ceiling(4, 64);
    let mut cache = IdMapCache::new();

    for i in 0..4 {
        map.acquire(&mut cache, i);
    }
    assert_eq!(map.capacity(), 4);

    let expanded = map.acquire(&mut cache, 4);
    assert_eq!(map.capacity(), 8);
    assert_eq!(expanded.gen(), 0);

    // The rest of the fresh block is served from the cache without
    // another expansion.
    for i in 5..8 {
        map.acquire(&mut cache, i);
    }
    assert_eq!(map.capacity(), 8);
}

#[test]
#[should_panic(expected = "id store ceiling reached")]
fn store_ceiling_is_fatal() {
    let map: IdMap<u32, 4> = IdMap::with_ceiling(4, 4);
    let mut cache = IdMapCache::new();
    for i in 0..5 {
        map.acquire(&mut cache, i);
    }
}

#[test]
fn lookup_rejects_stale_and_foreign_handles() {
    let map: IdMap<u32, 4> = IdMap::with_ceiling(4, 64);
    let mut cache = IdMapCache::new();

    let handle = map.acquire(&mut cache, 11);
    assert_eq!(map.lookup(Handle::new(0, 1000)), None);

    map.release(&mut cache, handle);
    assert_eq!(map.lookup(handle), None);
}

#[test]
fn global_chain_head_is_never_live() {
    let map: IdMap<u32, 4> = IdMap::with_ceiling(16, 256);
    let mut cache = IdMapCache::new();
    let mut rng = StdRng::seed_from_u64(0x1d3a9);
    let mut live: Vec<Handle> = Vec::new();

    for step in 0..2000 {
        if live.is_empty() || rng.gen_bool(0.55) {
            live.push(map.acquire(&mut cache, step));
        } else {
            let victim = rng.gen_range(0..live.len());
            let handle = live.swap_remove(victim);
            map.release(&mut cache, handle);
        }

        let (_, head) = map.free_chain_head();
        if head != u32::MAX {
            assert!(
                live.iter().all(|h| h.id() != head),
                "free chain head {} is a live slot",
                head
            );
        }
    }
    assert_eq!(map.num_live() as usize, live.len());
}

#[test]
fn concurrent_churn_issues_unique_handles() {
    const NUM_WORKERS: usize = 8;
    const OPS_PER_WORKER: usize = 4000;

    let map: Arc<IdMap<u64>> = Arc::new(IdMap::new(0));
    let mut join_handles = Vec::new();

    for worker in 0..NUM_WORKERS {
        let map = Arc::clone(&map);
        join_handles.push(thread::spawn(move || {
            let mut cache = IdMapCache::new();
            let mut rng = StdRng::seed_from_u64(worker as u64);
            let mut held: Vec<Handle> = Vec::new();
            let mut issued: Vec<Handle> = Vec::new();
            let mut num_releases = 0u32;

            for op in 0..OPS_PER_WORKER {
                if held.is_empty() || rng.gen_bool(0.6) {
                    let handle = map.acquire(&mut cache, (worker * OPS_PER_WORKER + op) as u64);
                    issued.push(handle);
                    held.push(handle);
                } else if rng.gen_bool(0.3) && held.len() >= 32 {
                    let batch: Vec<Handle> = held.drain(..32).collect();
                    num_releases += batch.len() as u32;
                    map.bulk_release(&mut cache, &batch);
                } else {
                    let victim = rng.gen_range(0..held.len());
                    let handle = held.swap_remove(victim);
                    num_releases += 1;
                    map.release(&mut cache, handle);
                }
            }
            (issued, held.len() as u32, num_releases)
        }));
    }

    let mut all_issued: Vec<Handle> = Vec::new();
    let mut total_held = 0u32;
    let mut total_released = 0u32;
    for join_handle in join_handles {
        let (issued, held, released) = join_handle.join().unwrap();
        all_issued.extend(issued);
        total_held += held;
        total_released += released;
    }

    // No (gen, id) pair is ever issued twice, across all workers.
    let unique: HashSet<u64> = all_issued.iter().map(|h| h.0).collect();
    assert_eq!(unique.len(), all_issued.len());

    assert_eq!(all_issued.len() as u32 - total_released, total_held);
    assert_eq!(map.num_live(), total_held);
}

#[test]
fn values_survive_concurrent_lookup() {
    const NUM_READERS: usize = 4;

    let map: Arc<IdMap<u64>> = Arc::new(IdMap::new(64));
    let mut cache = IdMapCache::new();
    let handles: Arc<Vec<Handle>> = Arc::new(
        (0..256u64)
            .map(|i| map.acquire(&mut cache, i * 3))
            .collect(),
    );

    let mut readers = Vec::new();
    for _ in 0..NUM_READERS {
        let map = Arc::clone(&map);
        let handles = Arc::clone(&handles);
        readers.push(thread::spawn(move || {
            for (i, handle) in handles.iter().enumerate() {
                assert_eq!(map.lookup(*handle), Some(&(i as u64 * 3)));
            }
        }));
    }
    for reader in readers {
        reader.join().unwrap();
    }
}
