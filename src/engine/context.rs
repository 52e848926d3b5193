//! Engine configuration and the per-tick context root.
//!
//! The upstream design for this engine family parks the state store, the
//! temp allocator and sizing constants in device-global singletons. Here
//! the same roles are filled by two explicit values: an [`EngineConfig`]
//! consumed at build time, and a [`TickContext`] borrowed into every node
//! entry at run time. Threading the root explicitly keeps every dependency
//! visible at the call site and makes the core trivially testable.

use crate::engine::state::StateStore;
use crate::engine::tmp_alloc::TmpAllocator;

/// Build-time sizing for one engine instance.
///
/// ## Fields
/// * `num_worlds` — Number of independent simulation worlds sharing the
///   graph. Drives the radix pass count for world-keyed sorts.
/// * `num_workers` — Worker lane count the graph is sized for. Running a
///   tick from a rayon pool with more threads than this is rejected.
/// * `tmp_reserve_bytes` — Address range reserved by the temp arena.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Number of worlds sharing the graph.
    pub num_worlds: u32,
    /// Worker lane count.
    pub num_workers: u32,
    /// Temp arena reservation in bytes.
    pub tmp_reserve_bytes: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            num_worlds: 1,
            num_workers: rayon::current_num_threads() as u32,
            tmp_reserve_bytes: 1 << 30,
        }
    }
}

/// Borrowed root passed into every node entry for one tick.
///
/// Bundles the external state store and the temp allocator. Entries
/// receive `(&TickContext, invocation_idx)` plus whatever their capture
/// closed over; nothing in the core reaches for global state.
#[derive(Clone, Copy)]
pub struct TickContext<'a> {
    /// External component/archetype storage.
    pub state: &'a dyn StateStore,
    /// Per-tick scratch arena, reset by the graph's reset node.
    pub tmp: &'a TmpAllocator,
}

impl<'a> TickContext<'a> {
    /// Creates a context over a state store and temp arena.
    pub fn new(state: &'a dyn StateStore, tmp: &'a TmpAllocator) -> Self {
        TickContext { state, tmp }
    }
}
