//! # Batch Engine
//!
//! Core of an ECS-based, multi-world batch simulation engine: thousands of
//! independent worlds execute an identical per-tick pipeline of systems in
//! parallel over shared code and component storage.
//!
//! ## What lives here
//! - A **generational ID map**: a concurrent allocator of stable
//!   `(generation, index)` handles with per-worker caches over a lock-free
//!   global free chain.
//! - A **task graph scheduler**: a DAG of typed nodes topologically sorted
//!   once, then executed each tick by a fixed pool of worker lanes in
//!   fixed-size tiles, with per-lane run queues for work splitting and
//!   stealing.
//! - The pieces they depend on: a slab allocator for node capture
//!   payloads and a per-tick bump arena.
//!
//! Component and archetype storage is an external collaborator reached
//! through the [`StateStore`] trait; the scheduler asks it how much work
//! each node represents and hands invocation indices back to it.
//!
//! ## Design goals
//! - Lock-free hot paths (tile dispatch, handle recycling)
//! - Deterministic graph construction
//! - Explicitly threaded context instead of global state

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod engine;
pub mod profiling;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

// Identifier types and constants

pub use engine::types::{
    ArchetypeId,
    ComponentId,
    Handle,
    NodeId,
    QueryRef,
    IDS_PER_CACHE,
    MAX_JOB_ALIGN,
    MAX_JOB_SIZE,
    TILE_WIDTH,
    WORLD_ID_COLUMN,
};

// ID map

pub use engine::id_map::{IdMap, IdMapCache};

// Task graph

pub use engine::graph::{Builder, NodeKind};
pub use engine::taskgraph::{TaskGraph, WorkerState};

// External seams

pub use engine::context::{EngineConfig, TickContext};
pub use engine::state::{SortState, StateStore};

// Allocators

pub use engine::job_alloc::{JobAllocator, WorkerJobAlloc};
pub use engine::run_queue::{RunQueue, SplitRange};
pub use engine::tmp_alloc::TmpAllocator;

// Errors

pub use engine::error::{ArenaReserveError, GraphBuildError, StoreCapacityError};

// Profiling

pub use profiling::profiler;

// ─────────────────────────────────────────────────────────────────────────────
// Prelude (Optional but recommended)
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used engine types.
///
/// Import with:
/// ```rust
/// use batch_engine::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        ArchetypeId,
        Builder,
        ComponentId,
        EngineConfig,
        Handle,
        IdMap,
        IdMapCache,
        NodeId,
        QueryRef,
        SortState,
        StateStore,
        TaskGraph,
        TickContext,
        TmpAllocator,
    };
}
