//! State store interface consumed by the scheduler.
//!
//! The engine core does not own component storage. Archetype tables, query
//! caches and sort scratch memory live in an external **state store**; the
//! scheduler only needs to ask it how much work each node represents and
//! to hand invocation indices back to it. This module defines that seam.
//!
//! Implementations must be callable from every worker lane concurrently.
//! Intra-node writes to the same archetype are serialized by the node's own
//! discipline (the compaction/sort structure of the graph, or locks the
//! implementation places around shared scratch buffers); the scheduler
//! guarantees only that dependency nodes have fully completed before a
//! node's first invocation runs.

use crate::engine::types::{ArchetypeId, ComponentId, QueryRef};

/// Snapshot of an archetype's in-progress sort.
///
/// Produced once per armed sort and read by the histogram and onesweep
/// passes to size their dispatches.
#[derive(Clone, Copy, Debug, Default)]
pub struct SortState {
    /// Number of sort threads the current pass dispatches.
    pub num_sort_threads: u32,
}

/// Component/archetype storage as seen by the scheduler.
///
/// All methods take `&self`; implementations provide their own interior
/// synchronization where invocations of one node touch shared state.
pub trait StateStore: Sync {
    /// Number of rows currently matching `query`.
    fn num_matching_entities(&self, query: QueryRef) -> u32;

    /// Column index of `component` within `archetype`.
    fn archetype_column_index(&self, archetype: ArchetypeId, component: ComponentId) -> u32;

    /// Whether `archetype` has holes that compaction would close.
    fn is_archetype_dirty(&self, archetype: ArchetypeId) -> bool;

    /// Current row count of `archetype`.
    fn num_archetype_rows(&self, archetype: ArchetypeId) -> u32;

    /// Prepares sort scratch state for `archetype` keyed on `column_idx`
    /// with `num_passes` radix passes. Returns `false` when the archetype
    /// is already sorted and the whole sort pipeline should be skipped
    /// this tick.
    fn archetype_setup_sort_state(
        &self,
        archetype: ArchetypeId,
        column_idx: u32,
        num_passes: u32,
    ) -> bool;

    /// Snapshot of the sort prepared by the most recent setup pass.
    fn current_sort_state(&self, archetype: ArchetypeId) -> SortState;

    /// One invocation of the sort setup pass.
    fn sort_archetype_setup(&self, archetype: ArchetypeId, invocation_idx: u32);

    /// One invocation of the radix histogram pass.
    fn sort_archetype_histogram(&self, archetype: ArchetypeId, invocation_idx: u32);

    /// One invocation of the histogram prefix-sum pass.
    fn sort_archetype_prefix_sum(&self, archetype: ArchetypeId, invocation_idx: u32);

    /// One invocation of onesweep radix pass `pass_idx`.
    fn sort_archetype_onesweep(&self, archetype: ArchetypeId, pass_idx: u32, invocation_idx: u32);

    /// One invocation of archetype compaction.
    fn compact_archetype(&self, archetype: ArchetypeId, invocation_idx: u32);

    /// Returns `(base, count)` describing the entities awaiting recycling.
    ///
    /// Called once when the recycle node is armed; the base is latched into
    /// the node payload for the invocations to use.
    fn fetch_recyclable_entities(&self) -> (u32, u32);

    /// Recycles the entity at `base + invocation_idx`.
    fn recycle_entities(&self, invocation_idx: u32, base: u32);
}
