//! Error types for graph construction and resource ceilings.
//!
//! This module declares focused, composable error types used across the
//! graph builder and the allocators. Each error carries enough context to
//! make failures actionable while remaining small and cheap to pass around.
//!
//! ## Goals
//! * **Specificity:** Each error type models a single failure mode (e.g. a
//!   dependency cycle, a slot store ceiling).
//! * **Ergonomics:** All errors implement [`std::error::Error`] and
//!   [`fmt::Display`].
//! * **Actionability:** Structured fields (e.g. the number of nodes left
//!   unplaced by a failed topological sort) make logs useful without
//!   reproducing the issue.
//!
//! ## Fatal versus recoverable
//! Graph validation failures are surfaced as values from
//! [`Builder::build`](crate::engine::graph::Builder::build) so callers can
//! report them; resource exhaustion (slot store ceiling, arena reservation)
//! aborts the engine with one of these types as the panic payload message.
//! Nodes that evaluate to zero invocations are not errors and are silently
//! skipped by the scheduler.
//!
//! ## Display vs. Debug
//! * [`fmt::Display`] is optimized for operator logs (short, imperative
//!   phrasing).
//! * [`fmt::Debug`] (derived) retains full structure for diagnostics.

use std::fmt;

/// Returned when a task graph fails validation during [`build`].
///
/// ## Context
/// The builder finalizes a graph by topologically sorting the registered
/// nodes. Validation requires that the entry node has no dependencies and
/// that every node can be placed after its dependencies; a registration
/// sequence that violates either property produces this error.
///
/// ## Variants
/// * `EmptyGraph` — no nodes were registered before `build`.
/// * `EntryHasDependencies` — node 0 declared one or more dependencies.
/// * `DependencyCycle` — a full placement pass made no progress, which can
///   only happen when the remaining nodes form at least one cycle.
///
/// [`build`]: crate::engine::graph::Builder::build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphBuildError {
    /// No nodes were registered.
    EmptyGraph,

    /// The entry node declared dependencies.
    EntryHasDependencies {
        /// Number of dependencies the entry node declared.
        dep_count: u32,
    },

    /// The dependency relation contains a cycle.
    DependencyCycle {
        /// Number of nodes that could not be placed.
        num_unplaced: u32,
    },
}

impl fmt::Display for GraphBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphBuildError::EmptyGraph => f.write_str("graph contains no nodes"),
            GraphBuildError::EntryHasDependencies { dep_count } => write!(
                f,
                "entry node must have zero dependencies ({} declared)",
                dep_count
            ),
            GraphBuildError::DependencyCycle { num_unplaced } => write!(
                f,
                "dependency cycle detected ({} nodes unplaced)",
                num_unplaced
            ),
        }
    }
}

impl std::error::Error for GraphBuildError {}

/// Returned when the ID map cannot grow its slot store any further.
///
/// ## Context
/// The slot store expands in fixed-size blocks up to a ceiling chosen at
/// construction. Exceeding the ceiling is a resource exhaustion condition:
/// the engine treats it as fatal and panics with this error as the
/// diagnostic.
///
/// ### Fields
/// * `requested` — Total slot count the expansion attempted to reach.
/// * `ceiling` — The configured upper bound that prevented it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCapacityError {
    /// Total slot count the expansion attempted to reach.
    pub requested: u64,

    /// Configured slot ceiling.
    pub ceiling: u64,
}

impl fmt::Display for StoreCapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id store ceiling reached ({} requested; ceiling {})",
            self.requested, self.ceiling
        )
    }
}

impl std::error::Error for StoreCapacityError {}

/// Returned when the temp arena's reservation is exhausted.
///
/// ## Context
/// The arena reserves its full address range once at construction and only
/// grows the committed prefix. An allocation that would run past the
/// reservation cannot be satisfied by growing; the engine treats this as
/// fatal and panics with this error as the diagnostic.
///
/// ### Fields
/// * `requested_end` — Byte offset the allocation would have reached.
/// * `reserved` — Total reserved bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaReserveError {
    /// Byte offset the allocation would have reached.
    pub requested_end: u64,

    /// Total reserved bytes.
    pub reserved: u64,
}

impl fmt::Display for ArenaReserveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "temp arena reservation exhausted (offset {} requested; {} reserved)",
            self.requested_end, self.reserved
        )
    }
}

impl std::error::Error for ArenaReserveError {}
