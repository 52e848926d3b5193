//! Task graph scheduler core.
//!
//! ## Execution model
//! The graph is an immutable array of nodes in topological order plus one
//! global cursor. Each tick:
//!
//! 1. The first node with a nonzero invocation count is **armed**: its
//!    offset, remaining and total counters are initialized and the cursor
//!    is published.
//! 2. Every worker lane loops: drain the lane's own run queue, then ask
//!    the graph for a tile, then try to steal from sibling queues.
//! 3. A tile claim is one fetch-add of [`TILE_WIDTH`] on the current
//!    node's offset; the final tile is truncated to the remaining count.
//! 4. After running its invocations a lane decrements the node's
//!    remaining counter by the number it actually executed. The lane that
//!    brings the counter to zero advances the cursor, computing and
//!    skipping zero-count nodes, arming the next live node, and publishing
//!    the new index with release semantics. When no live node remains it
//!    publishes the terminal sentinel and every lane exits.
//!
//! Because nodes are topologically sorted and the cursor is monotonic, a
//! node's first invocation cannot run until every dependency has been
//! observed complete by the advancing lane.
//!
//! ## Work splitting
//! A lane running a multi-invocation range publishes the untouched tail of
//! the range onto its own run queue whenever the queue probes empty, then
//! continues with the invocation in hand. Lanes that find the graph in the
//! `Loop` state (tiles exhausted, node still draining) steal those ranges
//! instead of spinning dry. Splitting balances skewed invocation counts;
//! correctness does not depend on it.
//!
//! ## Memory ordering
//! - Cursor: release on publish, acquire on read.
//! - Tile offset: relaxed fetch-add; overshooting lanes re-check against
//!   the total and loop.
//! - Remaining counter: acq-rel decrement, so the advancing lane observes
//!   every prior tile's side effects.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::engine::context::{EngineConfig, TickContext};
use crate::engine::graph::{dispose_info, NodeInfo, NodeKind};
use crate::engine::job_alloc::{JobAllocator, WorkerJobAlloc};
use crate::engine::run_queue::{RunQueue, SplitRange};
use crate::engine::types::TILE_WIDTH;
use crate::profiling::profiler;

/// Cache-line aligned per-node scheduling state.
///
/// The info is immutable after build; the three counters are the only
/// words mutated while a tick runs.
#[repr(align(64))]
struct NodeState {
    info: NodeInfo,
    cur_offset: AtomicU32,
    num_remaining: AtomicU32,
    total_num_invocations: AtomicU32,
}

impl NodeState {
    fn new(info: NodeInfo) -> Self {
        NodeState {
            info,
            cur_offset: AtomicU32::new(0),
            num_remaining: AtomicU32::new(0),
            total_num_invocations: AtomicU32::new(0),
        }
    }
}

/// Outcome of one [`TaskGraph::get_work`] poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    /// A tile was claimed: run invocations `base .. base + count` of the
    /// node at `node_idx`, then report completion via
    /// [`TaskGraph::finish_work`].
    Run {
        /// Index of the node in the sorted array.
        node_idx: u32,
        /// First invocation index of the tile.
        base: u32,
        /// Invocations in the tile; the final tile of a node is truncated.
        count: u32,
    },
    /// The current node has no tiles left but is still draining; poll
    /// again (and steal in the meantime).
    Loop,
    /// The graph is complete for this tick.
    Exit,
}

/// Immutable, topologically sorted task graph plus per-tick run state.
///
/// Built once by [`Builder`](crate::engine::graph::Builder); the only
/// mutation between ticks is the node counters and the cursor.
pub struct TaskGraph {
    sorted_nodes: Box<[NodeState]>,
    cur_node_idx: AtomicU32,
    queues: Box<[RunQueue]>,
    alloc: Arc<JobAllocator>,
    alloc_worker: Mutex<WorkerJobAlloc>,
}

unsafe impl Send for TaskGraph {}
unsafe impl Sync for TaskGraph {}

impl TaskGraph {
    pub(crate) fn new(
        sorted: Vec<NodeInfo>,
        config: EngineConfig,
        alloc: Arc<JobAllocator>,
        alloc_worker: WorkerJobAlloc,
    ) -> Self {
        let num_nodes = sorted.len() as u32;
        let sorted_nodes: Box<[NodeState]> =
            sorted.into_iter().map(NodeState::new).collect();
        let queues: Box<[RunQueue]> = (0..config.num_workers.max(1))
            .map(|_| RunQueue::new())
            .collect();
        TaskGraph {
            sorted_nodes,
            cur_node_idx: AtomicU32::new(num_nodes),
            queues,
            alloc,
            alloc_worker: Mutex::new(alloc_worker),
        }
    }

    /// Number of nodes in the sorted graph.
    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.sorted_nodes.len()
    }

    /// Kind of the node at sorted position `node_idx`.
    pub fn node_kind(&self, node_idx: usize) -> NodeKind {
        self.sorted_nodes[node_idx].info.kind()
    }

    /// Computes how many invocations a node represents this tick.
    ///
    /// Called only by the lane that is arming the node, so payload
    /// latching (the recycle base) and counting side effects (the arena
    /// reset) happen exactly once per tick.
    fn compute_num_invocations(&self, ctx: &TickContext<'_>, node: &NodeState) -> u32 {
        match &node.info {
            NodeInfo::ParallelFor { query, .. } => ctx.state.num_matching_entities(*query),
            NodeInfo::ClearTemporaries => 1,
            NodeInfo::CompactArchetype { archetype } => {
                if !ctx.state.is_archetype_dirty(*archetype) {
                    return 0;
                }
                ctx.state.num_archetype_rows(*archetype)
            }
            NodeInfo::SortSetup {
                archetype,
                column_idx,
                num_passes,
            } => {
                let need_sort = ctx.state.archetype_setup_sort_state(
                    *archetype,
                    *column_idx,
                    *num_passes,
                );
                if need_sort {
                    TILE_WIDTH
                } else {
                    0
                }
            }
            NodeInfo::SortHistogram { archetype } => {
                ctx.state.current_sort_state(*archetype).num_sort_threads
            }
            NodeInfo::SortPrefixSum { .. } => TILE_WIDTH,
            NodeInfo::SortOnesweep { archetype, .. } => {
                ctx.state.current_sort_state(*archetype).num_sort_threads
            }
            NodeInfo::RecycleEntities { recycle_base } => {
                let (base, num_deleted) = ctx.state.fetch_recyclable_entities();
                if num_deleted > 0 {
                    recycle_base.store(base, Ordering::Relaxed);
                }
                num_deleted
            }
            NodeInfo::ResetTmpAllocator => {
                // The reset is the arming side effect; no invocations run.
                ctx.tmp.reset();
                0
            }
        }
    }

    fn execute_invocation(&self, ctx: &TickContext<'_>, node: &NodeState, invocation_idx: u32) {
        match &node.info {
            NodeInfo::ParallelFor { func, .. } => unsafe {
                (func.call)(func.data, ctx, invocation_idx)
            },
            NodeInfo::ClearTemporaries => {}
            NodeInfo::CompactArchetype { archetype } => {
                ctx.state.compact_archetype(*archetype, invocation_idx)
            }
            NodeInfo::SortSetup { archetype, .. } => {
                ctx.state.sort_archetype_setup(*archetype, invocation_idx)
            }
            NodeInfo::SortHistogram { archetype } => {
                ctx.state.sort_archetype_histogram(*archetype, invocation_idx)
            }
            NodeInfo::SortPrefixSum { archetype } => {
                ctx.state.sort_archetype_prefix_sum(*archetype, invocation_idx)
            }
            NodeInfo::SortOnesweep {
                archetype,
                pass_idx,
            } => ctx
                .state
                .sort_archetype_onesweep(*archetype, *pass_idx, invocation_idx),
            NodeInfo::RecycleEntities { recycle_base } => ctx
                .state
                .recycle_entities(invocation_idx, recycle_base.load(Ordering::Relaxed)),
            NodeInfo::ResetTmpAllocator => {}
        }
    }

    /// Arms the first node with a nonzero count and publishes the cursor.
    fn init_tick(&self, ctx: &TickContext<'_>) {
        let num_nodes = self.sorted_nodes.len() as u32;
        let mut first = 0u32;
        while first < num_nodes {
            let node = &self.sorted_nodes[first as usize];
            let total = self.compute_num_invocations(ctx, node);
            if total > 0 {
                node.cur_offset.store(0, Ordering::Relaxed);
                node.num_remaining.store(total, Ordering::Relaxed);
                node.total_num_invocations.store(total, Ordering::Relaxed);
                break;
            }
            first += 1;
        }
        self.cur_node_idx.store(first, Ordering::Release);
    }

    /// Polls the graph for a tile of work.
    pub fn get_work(&self) -> WorkerState {
        let node_idx = self.cur_node_idx.load(Ordering::Acquire);
        if node_idx == self.sorted_nodes.len() as u32 {
            return WorkerState::Exit;
        }

        let node = &self.sorted_nodes[node_idx as usize];
        let cur_offset = node.cur_offset.load(Ordering::Relaxed);
        let total = node.total_num_invocations.load(Ordering::Relaxed);
        if cur_offset >= total {
            return WorkerState::Loop;
        }

        let base = node.cur_offset.fetch_add(TILE_WIDTH, Ordering::Relaxed);
        if base >= total {
            return WorkerState::Loop;
        }

        WorkerState::Run {
            node_idx,
            base,
            count: (total - base).min(TILE_WIDTH),
        }
    }

    /// Reports `num_finished` executed invocations of a node.
    ///
    /// The lane whose report brings the remaining count to zero advances
    /// the cursor: it walks forward from the completed node, computing and
    /// skipping zero-count nodes, arms the first live one, and publishes
    /// the new cursor (or the terminal sentinel) with release semantics.
    pub fn finish_work(&self, ctx: &TickContext<'_>, node_idx: u32, num_finished: u32) {
        let node = &self.sorted_nodes[node_idx as usize];
        let prev_remaining = node.num_remaining.fetch_sub(num_finished, Ordering::AcqRel);
        debug_assert!(prev_remaining >= num_finished);

        if prev_remaining != num_finished {
            return;
        }

        let num_nodes = self.sorted_nodes.len() as u32;
        let mut next_node_idx = node_idx + 1;
        while next_node_idx < num_nodes {
            let next_node = &self.sorted_nodes[next_node_idx as usize];
            let total = self.compute_num_invocations(ctx, next_node);
            if total == 0 {
                next_node_idx += 1;
                continue;
            }
            next_node.cur_offset.store(0, Ordering::Relaxed);
            next_node.num_remaining.store(total, Ordering::Relaxed);
            next_node.total_num_invocations.store(total, Ordering::Relaxed);
            break;
        }
        self.cur_node_idx.store(next_node_idx, Ordering::Release);
    }

    /// Runs a range of invocations, splitting the tail onto `queue`
    /// whenever the queue probes empty. Returns how many invocations this
    /// call executed itself.
    fn run_range(
        &self,
        ctx: &TickContext<'_>,
        queue: &RunQueue,
        node_idx: u32,
        base: u32,
        count: u32,
    ) -> u32 {
        debug_assert!(count > 0);
        let node = &self.sorted_nodes[node_idx as usize];
        let mut invocation_idx = base;
        let mut remaining = count;
        loop {
            let cur_invocation = invocation_idx;
            invocation_idx += 1;
            remaining -= 1;

            if remaining > 0 && queue.is_empty() {
                let split = SplitRange {
                    node_idx,
                    base: invocation_idx,
                    count: remaining,
                };
                if queue.push(split) {
                    remaining = 0;
                }
            }

            self.execute_invocation(ctx, node, cur_invocation);

            if remaining == 0 {
                break;
            }
        }
        invocation_idx - base
    }

    fn lane_loop(&self, ctx: &TickContext<'_>, lane: usize) {
        let num_lanes = self.queues.len();
        loop {
            if let Some(range) = self.queues[lane].pop() {
                let executed = self.run_range(
                    ctx,
                    &self.queues[lane],
                    range.node_idx,
                    range.base,
                    range.count,
                );
                self.finish_work(ctx, range.node_idx, executed);
                continue;
            }

            match self.get_work() {
                WorkerState::Exit => return,
                WorkerState::Run {
                    node_idx,
                    base,
                    count,
                } => {
                    let executed =
                        self.run_range(ctx, &self.queues[lane], node_idx, base, count);
                    self.finish_work(ctx, node_idx, executed);
                }
                WorkerState::Loop => {
                    let mut stole = false;
                    for i in 1..num_lanes {
                        let victim = &self.queues[(lane + i) % num_lanes];
                        if let Some(range) = victim.pop() {
                            let executed = self.run_range(
                                ctx,
                                &self.queues[lane],
                                range.node_idx,
                                range.base,
                                range.count,
                            );
                            self.finish_work(ctx, range.node_idx, executed);
                            stole = true;
                            break;
                        }
                    }
                    if !stole {
                        std::hint::spin_loop();
                    }
                }
            }
        }
    }

    /// Executes one tick of the graph to completion.
    ///
    /// Arms the first live node, fans the lane loop out over the current
    /// rayon pool, and returns when every lane has observed the terminal
    /// sentinel. Must not be called while another tick of the same graph
    /// is in flight.
    ///
    /// ## Panics
    /// Panics if the current rayon pool has more threads than the worker
    /// count the graph was configured for.
    pub fn run_tick(&self, ctx: &TickContext<'_>) {
        let _span = profiler::span("TaskGraph::run_tick");

        assert!(
            rayon::current_num_threads() <= self.queues.len(),
            "rayon pool has {} threads but the graph was configured for {} workers",
            rayon::current_num_threads(),
            self.queues.len()
        );

        self.init_tick(ctx);
        if self.cur_node_idx.load(Ordering::Acquire) == self.sorted_nodes.len() as u32 {
            return;
        }

        rayon::broadcast(|lane_ctx| {
            let _lane_span = profiler::span("TaskGraph::lane");
            self.lane_loop(ctx, lane_ctx.index());
        });
    }
}

impl Drop for TaskGraph {
    fn drop(&mut self) {
        let mut worker = self.alloc_worker.lock().unwrap();
        for node in self.sorted_nodes.iter_mut() {
            let info = std::mem::replace(&mut node.info, NodeInfo::ClearTemporaries);
            dispose_info(info, &self.alloc, &mut worker);
        }
    }
}
