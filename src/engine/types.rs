//! Core identifier types, bit-level layouts, and engine-wide constants.
//!
//! This module defines the **fundamental types and compile-time constants**
//! shared by every subsystem of the engine: the generational handle layout,
//! dense identifiers for graph nodes, queries, archetypes and components,
//! and the sizing constants that govern the ID map, the tile dispatcher,
//! and the job payload allocator.
//!
//! ## Handle representation
//!
//! Handles are encoded as a packed 64-bit integer:
//!
//! ```text
//! | gen (32 bits) | id (32 bits) |
//! ```
//!
//! - **id** is a dense index into the ID map's slot store.
//! - **gen** is the slot's generation counter at acquisition time. A handle
//!   is valid only while the slot still carries that generation; releasing
//!   the slot increments the counter and invalidates every outstanding
//!   handle for it.
//!
//! The 32-bit generation makes accidental collision after wrap-around a
//! non-concern for any realistic run length.
//!
//! ## Sizing constants
//!
//! All capacities here are compile-time constants validated by static
//! assertions:
//!
//! - [`IDS_PER_CACHE`] is the exact length of every sublist on the ID map's
//!   global free chain and the granularity of slot store expansion.
//! - [`TILE_WIDTH`] is the number of invocations dispatched per tile by the
//!   task graph.
//! - [`MAX_JOB_SIZE`] / [`MAX_JOB_ALIGN`] bound the capture payload of a
//!   parallel-for entry.

/// Number of generation bits in a [`Handle`].
pub const GEN_BITS: u32 = 32;
/// Number of index bits in a [`Handle`].
pub const ID_BITS: u32 = 32;

/// Raw generation counter value.
pub type Gen = u32;
/// Raw dense index value.
pub type Id = u32;

/// Default sublist length on the ID map's global free chain.
///
/// Every sublist pushed to or popped from the global chain contains exactly
/// this many slots, and the slot store expands in blocks of this size.
pub const IDS_PER_CACHE: u32 = 64;

/// Invocations dispatched per tile.
///
/// Tiles are fixed-size so that a dispatch is one atomic fetch-add on the
/// current node's offset; the final tile of a node is truncated to the
/// remaining invocation count.
pub const TILE_WIDTH: u32 = 256;

/// Upper bound on the byte size of a parallel-for capture payload.
pub const MAX_JOB_SIZE: usize = 1024;

/// Upper bound on the alignment of a parallel-for capture payload.
pub const MAX_JOB_ALIGN: usize = 64;

/// Capacity of each worker lane's split-range run queue.
pub const RUN_QUEUE_SIZE: usize = 1024;

/// Column index that holds the world identifier in every archetype.
///
/// Sorts keyed on this column use a reduced radix pass count derived from
/// the configured world count.
pub const WORLD_ID_COLUMN: u32 = 1;

const _: [(); 1] = [(); (GEN_BITS + ID_BITS == 64) as usize];
const _: [(); 1] = [(); (IDS_PER_CACHE >= 2) as usize];
const _: [(); 1] = [(); (TILE_WIDTH >= 1) as usize];
const _: [(); 1] = [(); RUN_QUEUE_SIZE.is_power_of_two() as usize];
const _: [(); 1] = [(); (MAX_JOB_SIZE % MAX_JOB_ALIGN == 0) as usize];

/// Generational handle to a slot in an ID map.
///
/// ## Purpose
/// `Handle` is a compact, copyable reference to a live value in an
/// [`IdMap`](crate::engine::id_map::IdMap). It encodes enough information
/// to detect stale references after the slot has been recycled.
///
/// ## Invariants
/// - Two handles with the same `id` but different `gen` refer to different
///   lifetimes of the same slot; at most one of them is valid.
/// - A handle is valid iff the slot at `id` still stores `gen`.
///
/// ## Notes
/// `Handle` values are cheap to copy and compare and are safe to pass
/// across threads.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Handle(pub u64);

#[inline]
const fn make_raw(gen: Gen, id: Id) -> u64 {
    ((gen as u64) << ID_BITS) | (id as u64)
}

impl Handle {
    /// Packs a generation and index into a handle.
    #[inline]
    pub const fn new(gen: Gen, id: Id) -> Self {
        Handle(make_raw(gen, id))
    }

    /// The sentinel handle that refers to no slot.
    #[inline]
    pub const fn none() -> Self {
        Handle(make_raw(!0, !0))
    }

    /// Returns the generation component.
    #[inline]
    pub const fn gen(self) -> Gen {
        (self.0 >> ID_BITS) as Gen
    }

    /// Returns the index component.
    #[inline]
    pub const fn id(self) -> Id {
        (self.0 & ((1u64 << ID_BITS) - 1)) as Id
    }

    /// Returns `true` if this is the sentinel handle.
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == Handle::none().0
    }
}

/// Identifier of a registered task graph node.
///
/// Returned by every builder registration method and consumed as a
/// dependency by later registrations. Node identifiers are dense and
/// reflect registration order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId(pub u32);

/// Reference to a precomputed component query in the state store.
///
/// The scheduler treats queries opaquely; the only operation it performs is
/// asking the state store how many rows currently match.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct QueryRef(pub u32);

/// Identifier of an archetype in the state store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ArchetypeId(pub u32);

/// Identifier of a registered component type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ComponentId(pub u32);

/// Index of a worker lane within the dispatch pool.
pub type WorkerId = u32;

/// Rounds `value` up to the next multiple of the power-of-two `alignment`.
#[inline]
pub(crate) const fn round_up_pow2(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

/// Wrap-safe greater-or-equal comparison of monotonically advancing
/// 32-bit counters.
///
/// Treats `a` as at-or-past `b` when the wrapped distance from `b` to `a`
/// is at most half the counter space. Both counters must advance by less
/// than `2^31` between comparisons.
#[inline]
pub(crate) const fn ge_wrapped(a: u32, b: u32) -> bool {
    a.wrapping_sub(b) <= (1u32 << 31)
}
