use std::sync::Arc;
use std::thread;

use batch_engine::{JobAllocator, WorkerJobAlloc, MAX_JOB_SIZE};

#[test]
fn reuses_blocks_through_the_worker_free_list() {
    let alloc = JobAllocator::new();
    let mut worker = WorkerJobAlloc::new();

    let block = alloc.alloc(&mut worker, 96, 16);
    unsafe { std::ptr::write_bytes(block.as_ptr(), 0xAB, 96) };
    alloc.dealloc(&mut worker, block, 96);

    // Same size class comes straight back off the local free list.
    let again = alloc.alloc(&mut worker, 100, 16);
    assert_eq!(again.as_ptr(), block.as_ptr());
}

#[test]
fn payload_bytes_round_trip() {
    let alloc = JobAllocator::new();
    let mut worker = WorkerJobAlloc::new();

    let block = alloc.alloc(&mut worker, 256, 64);
    assert_eq!(block.as_ptr() as usize % 64, 0);

    let payload: [u64; 32] = std::array::from_fn(|i| i as u64 * 17);
    unsafe {
        std::ptr::write(block.as_ptr() as *mut [u64; 32], payload);
        assert_eq!(std::ptr::read(block.as_ptr() as *const [u64; 32]), payload);
    }
    alloc.dealloc(&mut worker, block, 256);
}

#[test]
fn distinct_blocks_until_deallocated() {
    let alloc = JobAllocator::new();
    let mut worker = WorkerJobAlloc::new();

    let blocks: Vec<_> = (0..64).map(|_| alloc.alloc(&mut worker, 128, 8)).collect();
    let mut addrs: Vec<usize> = blocks.iter().map(|b| b.as_ptr() as usize).collect();
    addrs.sort_unstable();
    addrs.dedup();
    assert_eq!(addrs.len(), 64);

    for block in blocks {
        alloc.dealloc(&mut worker, block, 128);
    }
}

#[test]
fn blocks_drift_between_workers() {
    let alloc = Arc::new(JobAllocator::new());

    // Worker A allocates; the blocks are handed to worker B, which frees
    // them all, pushing half past the flush threshold into the shared
    // reservoir.
    let addresses: Vec<usize> = {
        let mut worker_a = WorkerJobAlloc::new();
        let blocks: Vec<_> = (0..128)
            .map(|_| alloc.alloc(&mut worker_a, 64, 8))
            .collect();
        blocks.iter().map(|b| b.as_ptr() as usize).collect::<Vec<_>>()
    };

    let alloc_b = Arc::clone(&alloc);
    let handle = thread::spawn(move || {
        let mut worker_b = WorkerJobAlloc::new();
        for &addr in &addresses {
            let ptr = std::ptr::NonNull::new(addr as *mut u8).unwrap();
            alloc_b.dealloc(&mut worker_b, ptr, 64);
        }
        addresses
    });
    let addresses = handle.join().unwrap();

    // A third worker with no local state refills from the reservoir.
    let mut worker_c = WorkerJobAlloc::new();
    let refilled = alloc.alloc(&mut worker_c, 64, 8);
    assert!(addresses.contains(&(refilled.as_ptr() as usize)));
}

#[test]
#[should_panic(expected = "job capture is too large")]
fn oversized_capture_aborts() {
    let alloc = JobAllocator::new();
    let mut worker = WorkerJobAlloc::new();
    let _ = alloc.alloc(&mut worker, MAX_JOB_SIZE + 1, 8);
}

#[test]
#[should_panic(expected = "job capture alignment")]
fn oversized_alignment_aborts() {
    let alloc = JobAllocator::new();
    let mut worker = WorkerJobAlloc::new();
    let _ = alloc.alloc(&mut worker, 64, 128);
}
