//! Profiling support.
//!
//! Emits Chrome trace event JSON consumable by:
//! - Perfetto
//! - `chrome://tracing`
//!
//! Enabled with the `profiling` feature; otherwise all span calls are
//! inert.

pub mod profiler;
