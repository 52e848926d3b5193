//! Shared bench fixtures.

#![allow(dead_code)]

use batch_engine::{ArchetypeId, ComponentId, QueryRef, SortState, StateStore};

/// Minimal state store: fixed query counts, everything else inert.
pub struct BenchStore {
    pub query_counts: Vec<u32>,
}

impl BenchStore {
    pub fn new(query_counts: Vec<u32>) -> Self {
        BenchStore { query_counts }
    }
}

impl StateStore for BenchStore {
    fn num_matching_entities(&self, query: QueryRef) -> u32 {
        self.query_counts[query.0 as usize]
    }

    fn archetype_column_index(&self, _archetype: ArchetypeId, _component: ComponentId) -> u32 {
        0
    }

    fn is_archetype_dirty(&self, _archetype: ArchetypeId) -> bool {
        false
    }

    fn num_archetype_rows(&self, _archetype: ArchetypeId) -> u32 {
        0
    }

    fn archetype_setup_sort_state(
        &self,
        _archetype: ArchetypeId,
        _column_idx: u32,
        _num_passes: u32,
    ) -> bool {
        false
    }

    fn current_sort_state(&self, _archetype: ArchetypeId) -> SortState {
        SortState::default()
    }

    fn sort_archetype_setup(&self, _archetype: ArchetypeId, _invocation_idx: u32) {}

    fn sort_archetype_histogram(&self, _archetype: ArchetypeId, _invocation_idx: u32) {}

    fn sort_archetype_prefix_sum(&self, _archetype: ArchetypeId, _invocation_idx: u32) {}

    fn sort_archetype_onesweep(
        &self,
        _archetype: ArchetypeId,
        _pass_idx: u32,
        _invocation_idx: u32,
    ) {
    }

    fn compact_archetype(&self, _archetype: ArchetypeId, _invocation_idx: u32) {}

    fn fetch_recyclable_entities(&self) -> (u32, u32) {
        (0, 0)
    }

    fn recycle_entities(&self, _invocation_idx: u32, _base: u32) {}
}
