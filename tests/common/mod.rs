//! Shared fixtures for the integration tests: a recording state store and
//! pool helpers.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use batch_engine::{ArchetypeId, ComponentId, QueryRef, SortState, StateStore, TILE_WIDTH};

/// State store stub with configurable answers and call recording.
pub struct MockStore {
    /// Row count reported per query index.
    pub query_counts: Vec<u32>,
    /// Column index reported for every `(archetype, component)` pair.
    pub column_index: u32,
    /// Dirty flag reported for every archetype.
    pub dirty: bool,
    /// Row count reported for every archetype.
    pub rows: u32,
    /// Whether sort setup reports a sort is needed.
    pub sort_needed: bool,
    /// Sort thread count reported by the current sort state.
    pub num_sort_threads: u32,
    /// `(base, count)` reported for pending entity recycling.
    pub recycle: (u32, u32),

    /// Invocation count of the sort setup pass.
    pub setup_calls: AtomicU32,
    /// Invocation count of the histogram pass.
    pub histogram_calls: AtomicU32,
    /// Invocation count of the prefix-sum pass.
    pub prefix_calls: AtomicU32,
    /// `(pass_idx, invocation_idx)` pairs seen by the onesweep pass.
    pub onesweep_calls: Mutex<Vec<(u32, u32)>>,
    /// Invocation count of compaction.
    pub compact_calls: AtomicU32,
    /// `(invocation_idx, base)` pairs seen by entity recycling.
    pub recycle_calls: Mutex<Vec<(u32, u32)>>,
}

impl MockStore {
    pub fn new() -> Self {
        MockStore {
            query_counts: Vec::new(),
            column_index: 0,
            dirty: false,
            rows: 0,
            sort_needed: false,
            num_sort_threads: 0,
            recycle: (0, 0),
            setup_calls: AtomicU32::new(0),
            histogram_calls: AtomicU32::new(0),
            prefix_calls: AtomicU32::new(0),
            onesweep_calls: Mutex::new(Vec::new()),
            compact_calls: AtomicU32::new(0),
            recycle_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_queries(query_counts: Vec<u32>) -> Self {
        let mut store = Self::new();
        store.query_counts = query_counts;
        store
    }
}

impl StateStore for MockStore {
    fn num_matching_entities(&self, query: QueryRef) -> u32 {
        self.query_counts[query.0 as usize]
    }

    fn archetype_column_index(&self, _archetype: ArchetypeId, _component: ComponentId) -> u32 {
        self.column_index
    }

    fn is_archetype_dirty(&self, _archetype: ArchetypeId) -> bool {
        self.dirty
    }

    fn num_archetype_rows(&self, _archetype: ArchetypeId) -> u32 {
        self.rows
    }

    fn archetype_setup_sort_state(
        &self,
        _archetype: ArchetypeId,
        _column_idx: u32,
        _num_passes: u32,
    ) -> bool {
        self.sort_needed
    }

    fn current_sort_state(&self, _archetype: ArchetypeId) -> SortState {
        SortState {
            num_sort_threads: self.num_sort_threads,
        }
    }

    fn sort_archetype_setup(&self, _archetype: ArchetypeId, _invocation_idx: u32) {
        self.setup_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn sort_archetype_histogram(&self, _archetype: ArchetypeId, _invocation_idx: u32) {
        // Every setup invocation must have completed before the first
        // histogram invocation runs.
        assert_eq!(self.setup_calls.load(Ordering::Relaxed), TILE_WIDTH);
        self.histogram_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn sort_archetype_prefix_sum(&self, _archetype: ArchetypeId, _invocation_idx: u32) {
        assert_eq!(
            self.histogram_calls.load(Ordering::Relaxed),
            self.num_sort_threads
        );
        self.prefix_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn sort_archetype_onesweep(&self, _archetype: ArchetypeId, pass_idx: u32, invocation_idx: u32) {
        self.onesweep_calls
            .lock()
            .unwrap()
            .push((pass_idx, invocation_idx));
    }

    fn compact_archetype(&self, _archetype: ArchetypeId, _invocation_idx: u32) {
        self.compact_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn fetch_recyclable_entities(&self) -> (u32, u32) {
        self.recycle
    }

    fn recycle_entities(&self, invocation_idx: u32, base: u32) {
        self.recycle_calls
            .lock()
            .unwrap()
            .push((invocation_idx, base));
    }
}
