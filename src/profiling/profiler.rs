//! Chrome Trace ("flame style") span profiling.
//!
//! Feature-gated with `--features profiling`; without the feature every
//! call compiles to nothing.
//!
//! Usage:
//!   batch_engine::profiler::init("profile/trace.json");
//!   {
//!     let _g = batch_engine::profiler::span("TaskGraph::run_tick");
//!     // run the tick...
//!   }
//!   batch_engine::profiler::shutdown();
//!
//! The output is a Chrome trace event array loadable in Perfetto or
//! `chrome://tracing`.

use std::path::Path;

#[cfg(feature = "profiling")]
mod enabled {
    use std::fs::File;
    use std::io::{BufWriter, Write};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Mutex, OnceLock};
    use std::time::Instant;

    use super::*;

    struct TraceEvent {
        name: String,
        ts_us: u64,
        dur_us: u64,
        tid: u64,
    }

    struct TraceState {
        start: Instant,
        path: PathBuf,
        events: Mutex<Vec<TraceEvent>>,
    }

    static STATE: OnceLock<TraceState> = OnceLock::new();
    static NEXT_TID: AtomicU64 = AtomicU64::new(1);

    thread_local! {
        static TID: u64 = NEXT_TID.fetch_add(1, Ordering::Relaxed);
    }

    /// RAII span; records a complete event when dropped.
    pub struct SpanGuard {
        name: Option<String>,
        start_us: u64,
    }

    impl Drop for SpanGuard {
        fn drop(&mut self) {
            let Some(name) = self.name.take() else {
                return;
            };
            let Some(state) = STATE.get() else {
                return;
            };
            let now_us = state.start.elapsed().as_micros() as u64;
            let event = TraceEvent {
                name,
                ts_us: self.start_us,
                dur_us: now_us.saturating_sub(self.start_us),
                tid: TID.with(|t| *t),
            };
            state.events.lock().unwrap().push(event);
        }
    }

    /// Installs the trace sink. First call wins; later calls are ignored.
    pub fn init<P: AsRef<Path>>(path: P) {
        let _ = STATE.set(TraceState {
            start: Instant::now(),
            path: path.as_ref().to_path_buf(),
            events: Mutex::new(Vec::new()),
        });
    }

    /// Opens a named span; the guard records it when dropped.
    pub fn span(name: &str) -> SpanGuard {
        let Some(state) = STATE.get() else {
            return SpanGuard {
                name: None,
                start_us: 0,
            };
        };
        SpanGuard {
            name: Some(name.to_string()),
            start_us: state.start.elapsed().as_micros() as u64,
        }
    }

    fn write_json_string<W: Write>(w: &mut W, s: &str) -> std::io::Result<()> {
        w.write_all(b"\"")?;
        for c in s.chars() {
            match c {
                '"' => w.write_all(b"\\\"")?,
                '\\' => w.write_all(b"\\\\")?,
                '\n' => w.write_all(b"\\n")?,
                c if (c as u32) < 0x20 => write!(w, "\\u{:04x}", c as u32)?,
                c => write!(w, "{}", c)?,
            }
        }
        w.write_all(b"\"")
    }

    /// Flushes all recorded spans to the trace file.
    pub fn shutdown() {
        let Some(state) = STATE.get() else {
            return;
        };
        if let Some(parent) = state.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let Ok(file) = File::create(&state.path) else {
            return;
        };
        let mut w = BufWriter::new(file);
        let events = state.events.lock().unwrap();
        let _ = w.write_all(b"[");
        for (i, event) in events.iter().enumerate() {
            if i > 0 {
                let _ = w.write_all(b",");
            }
            let _ = w.write_all(b"{\"ph\":\"X\",\"pid\":1,\"name\":");
            let _ = write_json_string(&mut w, &event.name);
            let _ = write!(
                w,
                ",\"ts\":{},\"dur\":{},\"tid\":{}}}",
                event.ts_us, event.dur_us, event.tid
            );
        }
        let _ = w.write_all(b"]");
        let _ = w.flush();
    }
}

#[cfg(not(feature = "profiling"))]
mod disabled {
    use super::*;

    /// RAII span; inert without the `profiling` feature.
    pub struct SpanGuard;

    /// Installs the trace sink. Inert without the `profiling` feature.
    #[inline]
    pub fn init<P: AsRef<Path>>(_path: P) {}

    /// Opens a named span. Inert without the `profiling` feature.
    #[inline]
    pub fn span(_name: &str) -> SpanGuard {
        SpanGuard
    }

    /// Flushes recorded spans. Inert without the `profiling` feature.
    #[inline]
    pub fn shutdown() {}
}

#[cfg(feature = "profiling")]
pub use enabled::{init, shutdown, span, SpanGuard};

#[cfg(not(feature = "profiling"))]
pub use disabled::{init, shutdown, span, SpanGuard};
