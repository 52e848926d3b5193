//! # Engine Module
//!
//! Internal engine core implementation.
//!
//! This module contains the two load-bearing subsystems and their
//! supporting pieces:
//! - Generational ID map with per-worker caches
//! - Task graph builder and scheduler
//! - Job payload allocator
//! - Per-lane run queues
//! - Per-tick temp arena
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod context;
pub mod error;
pub mod graph;
pub mod id_map;
pub mod job_alloc;
pub mod run_queue;
pub mod state;
pub mod taskgraph;
pub mod tmp_alloc;
pub mod types;
