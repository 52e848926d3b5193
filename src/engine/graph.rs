//! Node descriptors and the task graph builder.
//!
//! ## Purpose
//! User code registers the per-tick pipeline here: parallel-for systems
//! over queries, the archetype sort pipeline, compaction, entity recycling
//! and the temp-arena reset. `build` validates the dependency relation,
//! produces the topologically sorted node array, and hands it to the
//! scheduler.
//!
//! ## Registration model
//! Every registration appends one (or, for sorts, several) nodes to a flat
//! staging array and copies the dependency list into a packed pool. Node
//! identifiers are dense registration indices. Dependency indices are
//! validated at `build`; a dependency naming an unregistered index is a
//! programmer error and aborts.
//!
//! ## Determinism
//! `build` emits nodes by repeatedly scanning for the lowest-indexed
//! unplaced node whose dependencies are all placed. The output order is
//! therefore a pure function of the registration sequence: registration
//! order filtered by dependency availability, ties broken by insertion
//! index. Callers may rely on bit-identical node ordering across runs.
//!
//! ## Captures
//! A parallel-for entry is a closure whose capture is copied into a block
//! from the job payload allocator and invoked through a monomorphized
//! trampoline. Captures are bounded by [`MAX_JOB_SIZE`] and
//! [`MAX_JOB_ALIGN`]; oversized captures abort at registration.

use std::ptr::NonNull;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use crate::engine::context::{EngineConfig, TickContext};
use crate::engine::error::GraphBuildError;
use crate::engine::job_alloc::{JobAllocator, WorkerJobAlloc};
use crate::engine::state::StateStore;
use crate::engine::taskgraph::TaskGraph;
use crate::engine::types::{
    ArchetypeId, ComponentId, NodeId, QueryRef, MAX_JOB_ALIGN, MAX_JOB_SIZE, WORLD_ID_COLUMN,
};

/// Entry trampoline: `(capture, context, invocation index)`.
pub(crate) type EntryFn = unsafe fn(*const u8, &TickContext<'_>, u32);

/// Capture destructor trampoline.
pub(crate) type DropFn = unsafe fn(*mut u8);

/// A parallel-for entry bound to its capture block.
pub(crate) struct EntryFunc {
    pub(crate) data: *mut u8,
    pub(crate) call: EntryFn,
    pub(crate) drop_fn: DropFn,
    pub(crate) size: u32,
}

unsafe fn call_capture<F: Fn(&TickContext<'_>, u32)>(
    data: *const u8,
    ctx: &TickContext<'_>,
    invocation_idx: u32,
) {
    let func = unsafe { &*(data as *const F) };
    func(ctx, invocation_idx)
}

unsafe fn drop_capture<F>(data: *mut u8) {
    unsafe { std::ptr::drop_in_place(data as *mut F) }
}

/// Typed node descriptor.
///
/// The variant is the node's type; each carries the payload its entry and
/// invocation counting need. The recycle payload holds the base index
/// latched when the node is armed.
pub(crate) enum NodeInfo {
    ParallelFor {
        query: QueryRef,
        func: EntryFunc,
    },
    ClearTemporaries,
    CompactArchetype {
        archetype: ArchetypeId,
    },
    SortSetup {
        archetype: ArchetypeId,
        column_idx: u32,
        num_passes: u32,
    },
    SortHistogram {
        archetype: ArchetypeId,
    },
    SortPrefixSum {
        archetype: ArchetypeId,
    },
    SortOnesweep {
        archetype: ArchetypeId,
        pass_idx: u32,
    },
    RecycleEntities {
        recycle_base: AtomicU32,
    },
    ResetTmpAllocator,
}

/// Discriminant of a scheduled node, for introspection and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// Parallel-for system over a query.
    ParallelFor,
    /// No-op barrier node.
    ClearTemporaries,
    /// Archetype compaction.
    CompactArchetype,
    /// Sort pipeline: scratch state setup.
    SortSetup,
    /// Sort pipeline: radix histogram.
    SortHistogram,
    /// Sort pipeline: histogram prefix sum.
    SortPrefixSum,
    /// Sort pipeline: one onesweep radix pass.
    SortOnesweep,
    /// Entity recycling.
    RecycleEntities,
    /// Temp arena reset.
    ResetTmpAllocator,
}

impl NodeInfo {
    pub(crate) fn kind(&self) -> NodeKind {
        match self {
            NodeInfo::ParallelFor { .. } => NodeKind::ParallelFor,
            NodeInfo::ClearTemporaries => NodeKind::ClearTemporaries,
            NodeInfo::CompactArchetype { .. } => NodeKind::CompactArchetype,
            NodeInfo::SortSetup { .. } => NodeKind::SortSetup,
            NodeInfo::SortHistogram { .. } => NodeKind::SortHistogram,
            NodeInfo::SortPrefixSum { .. } => NodeKind::SortPrefixSum,
            NodeInfo::SortOnesweep { .. } => NodeKind::SortOnesweep,
            NodeInfo::RecycleEntities { .. } => NodeKind::RecycleEntities,
            NodeInfo::ResetTmpAllocator => NodeKind::ResetTmpAllocator,
        }
    }
}

/// Drops a node's capture and returns its block to the allocator.
pub(crate) fn dispose_info(
    info: NodeInfo,
    alloc: &JobAllocator,
    worker: &mut WorkerJobAlloc,
) {
    if let NodeInfo::ParallelFor { func, .. } = info {
        unsafe { (func.drop_fn)(func.data) };
        if func.size > 0 {
            let ptr = unsafe { NonNull::new_unchecked(func.data) };
            alloc.dealloc(worker, ptr, func.size as usize);
        }
    }
}

struct StagedNode {
    info: NodeInfo,
    dep_offset: u32,
    dep_count: u32,
}

/// Task graph builder.
///
/// Accumulates staged nodes and packed dependency lists, then finalizes
/// them into a [`TaskGraph`] with [`build`](Builder::build). The builder
/// borrows the state store to resolve sort column indices at registration
/// time.
pub struct Builder<'a> {
    state: &'a dyn StateStore,
    config: EngineConfig,
    staged: Vec<StagedNode>,
    all_dependencies: Vec<NodeId>,
    alloc: Arc<JobAllocator>,
    alloc_worker: WorkerJobAlloc,
}

impl<'a> Builder<'a> {
    /// Creates an empty builder for the given store and configuration.
    pub fn new(state: &'a dyn StateStore, config: EngineConfig) -> Self {
        Builder {
            state,
            config,
            staged: Vec::new(),
            all_dependencies: Vec::new(),
            alloc: Arc::new(JobAllocator::new()),
            alloc_worker: WorkerJobAlloc::new(),
        }
    }

    /// Number of nodes registered so far.
    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.staged.len()
    }

    fn register_node(&mut self, info: NodeInfo, dependencies: &[NodeId]) -> NodeId {
        let dep_offset = self.all_dependencies.len() as u32;
        self.all_dependencies.extend_from_slice(dependencies);
        let node_idx = self.staged.len() as u32;
        self.staged.push(StagedNode {
            info,
            dep_offset,
            dep_count: dependencies.len() as u32,
        });
        NodeId(node_idx)
    }

    /// Registers a parallel-for system over `query`.
    ///
    /// `func` runs once per matching row with `(&TickContext, row index)`.
    /// The invocation count is recomputed from the state store each tick
    /// when the node is armed.
    ///
    /// ## Panics
    /// Panics if the capture exceeds [`MAX_JOB_SIZE`] bytes or
    /// [`MAX_JOB_ALIGN`] alignment.
    pub fn parallel_for<F>(
        &mut self,
        query: QueryRef,
        func: F,
        dependencies: &[NodeId],
    ) -> NodeId
    where
        F: Fn(&TickContext<'_>, u32) + Send + Sync + 'static,
    {
        let size = std::mem::size_of::<F>();
        let align = std::mem::align_of::<F>();
        assert!(
            size <= MAX_JOB_SIZE,
            "parallel-for capture is too large ({} bytes; limit {})",
            size,
            MAX_JOB_SIZE
        );
        assert!(
            align <= MAX_JOB_ALIGN,
            "parallel-for capture alignment {} exceeds the limit {}",
            align,
            MAX_JOB_ALIGN
        );

        let data = if size == 0 {
            NonNull::<F>::dangling().as_ptr() as *mut u8
        } else {
            self.alloc
                .alloc(&mut self.alloc_worker, size, align)
                .as_ptr()
        };
        unsafe { std::ptr::write(data as *mut F, func) };

        let entry = EntryFunc {
            data,
            call: call_capture::<F>,
            drop_fn: drop_capture::<F>,
            size: size as u32,
        };
        self.register_node(NodeInfo::ParallelFor { query, func: entry }, dependencies)
    }

    /// Registers the sort pipeline for `archetype` keyed on `component`.
    ///
    /// Expands to setup, histogram and prefix-sum nodes followed by one
    /// onesweep node per radix pass, chained in order; the returned id is
    /// the final onesweep node. Sorts keyed on the world column derive the
    /// pass count from the configured world count; every other key sorts
    /// the full 32-bit range in four passes.
    pub fn sort_archetype(
        &mut self,
        archetype: ArchetypeId,
        component: ComponentId,
        dependencies: &[NodeId],
    ) -> NodeId {
        let column_idx = self.state.archetype_column_index(archetype, component);

        let num_passes = if column_idx == WORLD_ID_COLUMN {
            // num_worlds + 1 leaves room for rows with no world assigned.
            let num_bits = 32 - (self.config.num_worlds + 1).leading_zeros();
            num_bits.div_ceil(8)
        } else {
            4
        };

        let setup = self.register_node(
            NodeInfo::SortSetup {
                archetype,
                column_idx,
                num_passes,
            },
            dependencies,
        );
        let histogram = self.register_node(NodeInfo::SortHistogram { archetype }, &[setup]);
        let mut cur = self.register_node(NodeInfo::SortPrefixSum { archetype }, &[histogram]);
        for pass_idx in 0..num_passes {
            cur = self.register_node(
                NodeInfo::SortOnesweep {
                    archetype,
                    pass_idx,
                },
                &[cur],
            );
        }
        cur
    }

    /// Registers archetype compaction for `archetype`.
    ///
    /// The node counts zero invocations (and is skipped) on ticks where
    /// the archetype is not dirty.
    pub fn compact_archetype(
        &mut self,
        archetype: ArchetypeId,
        dependencies: &[NodeId],
    ) -> NodeId {
        self.register_node(NodeInfo::CompactArchetype { archetype }, dependencies)
    }

    /// Registers the entity recycling node.
    ///
    /// When armed, the node fetches the pending recycle span from the
    /// state store, latches its base index, and runs one invocation per
    /// pending entity.
    pub fn recycle_entities(&mut self, dependencies: &[NodeId]) -> NodeId {
        self.register_node(
            NodeInfo::RecycleEntities {
                recycle_base: AtomicU32::new(0),
            },
            dependencies,
        )
    }

    /// Registers the temp arena reset node.
    ///
    /// The reset happens as the side effect of arming the node, which then
    /// counts zero invocations and is skipped.
    pub fn reset_tmp_allocator(&mut self, dependencies: &[NodeId]) -> NodeId {
        self.register_node(NodeInfo::ResetTmpAllocator, dependencies)
    }

    /// Registers a no-op barrier node that always runs one invocation.
    pub fn clear_temporaries(&mut self, dependencies: &[NodeId]) -> NodeId {
        self.register_node(NodeInfo::ClearTemporaries, dependencies)
    }

    /// Finalizes the graph.
    ///
    /// ## Behavior
    /// Validates that the entry node has no dependencies, topologically
    /// sorts the staged nodes (deterministically, see the module docs),
    /// and produces the immutable scheduler graph.
    ///
    /// ## Errors
    /// - [`GraphBuildError::EmptyGraph`] when nothing was registered.
    /// - [`GraphBuildError::EntryHasDependencies`] when node 0 declared
    ///   dependencies.
    /// - [`GraphBuildError::DependencyCycle`] when a full placement pass
    ///   makes no progress.
    ///
    /// ## Panics
    /// Panics if a dependency names a node index that was never
    /// registered.
    pub fn build(mut self) -> Result<TaskGraph, GraphBuildError> {
        let num_nodes = self.staged.len();
        if num_nodes == 0 {
            return Err(GraphBuildError::EmptyGraph);
        }
        for dep in &self.all_dependencies {
            assert!(
                (dep.0 as usize) < num_nodes,
                "dependency {:?} does not name a registered node",
                dep
            );
        }
        if self.staged[0].dep_count != 0 {
            return Err(GraphBuildError::EntryHasDependencies {
                dep_count: self.staged[0].dep_count,
            });
        }

        let mut queued = vec![false; num_nodes];
        let mut order = Vec::with_capacity(num_nodes);
        queued[0] = true;
        order.push(0usize);

        let mut num_remaining = num_nodes - 1;
        while num_remaining > 0 {
            let mut emitted = None;
            'scan: for idx in 1..num_nodes {
                if queued[idx] {
                    continue;
                }
                let node = &self.staged[idx];
                let deps = &self.all_dependencies[node.dep_offset as usize..]
                    [..node.dep_count as usize];
                for dep in deps {
                    if !queued[dep.0 as usize] {
                        continue 'scan;
                    }
                }
                emitted = Some(idx);
                break;
            }
            match emitted {
                Some(idx) => {
                    queued[idx] = true;
                    order.push(idx);
                    num_remaining -= 1;
                }
                None => {
                    return Err(GraphBuildError::DependencyCycle {
                        num_unplaced: num_remaining as u32,
                    });
                }
            }
        }

        let staged = std::mem::take(&mut self.staged);
        let alloc = Arc::clone(&self.alloc);
        let alloc_worker = std::mem::take(&mut self.alloc_worker);
        let config = self.config;

        let mut slots: Vec<Option<NodeInfo>> =
            staged.into_iter().map(|node| Some(node.info)).collect();
        let sorted: Vec<NodeInfo> = order
            .iter()
            .map(|&idx| slots[idx].take().unwrap())
            .collect();

        Ok(TaskGraph::new(sorted, config, alloc, alloc_worker))
    }
}

impl Drop for Builder<'_> {
    fn drop(&mut self) {
        let staged = std::mem::take(&mut self.staged);
        for node in staged {
            dispose_info(node.info, &self.alloc, &mut self.alloc_worker);
        }
    }
}
