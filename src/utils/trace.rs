//! Kernel trace-marker output
//!
//! Writes to `/sys/kernel/tracing/trace_marker` so surface commits show up
//! in kernel traces next to the GPU and scheduler events. The host
//! application constructs one [`Tracer`] and hands clones of it to whatever
//! should emit markers; the default handle is a no-op.

use std::cell::Cell;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::rc::Rc;

use tracing::info;

const TRACE_MARKER_PATH: &str = "/sys/kernel/tracing/trace_marker";

/// A paired begin/end marker context
///
/// Returned by [`Tracer::begin_ctx`] and consumed by [`Tracer::end_ctx`], so
/// trace viewers can match up the two markers through the shared sequence
/// number.
#[derive(Debug)]
#[must_use]
pub struct TraceCtx {
    seq: u32,
}

struct TracerInner {
    file: File,
    prev_ctx: Cell<u32>,
}

/// Handle to the kernel trace marker
///
/// Cloning is cheap and all clones share the sequence counter.
#[derive(Clone, Default)]
pub struct Tracer {
    inner: Option<Rc<TracerInner>>,
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("enabled", &self.inner.is_some())
            .finish()
    }
}

impl Tracer {
    /// A tracer that discards every marker
    pub fn disabled() -> Tracer {
        Default::default()
    }

    /// Open the kernel trace marker
    ///
    /// If the marker file cannot be opened (tracefs not mounted, missing
    /// permissions), the returned tracer is a no-op.
    pub fn new() -> Tracer {
        let inner = match OpenOptions::new().write(true).open(TRACE_MARKER_PATH) {
            Ok(file) => {
                info!("Kernel tracing is enabled");
                Some(Rc::new(TracerInner {
                    file,
                    prev_ctx: Cell::new(0),
                }))
            }
            Err(_) => None,
        };
        Tracer { inner }
    }

    /// Emit a single marker
    pub fn emit(&self, message: &str) {
        if let Some(inner) = &self.inner {
            // Failures mean the trace buffer went away under us, nothing
            // actionable remains.
            let mut file = &inner.file;
            let _ = writeln!(file, "{}", message);
        }
    }

    /// Emit the begin marker of a paired context
    pub fn begin_ctx(&self, message: &str) -> TraceCtx {
        let seq = match &self.inner {
            Some(inner) => {
                let seq = inner.prev_ctx.get();
                inner.prev_ctx.set(seq.wrapping_add(1));
                seq
            }
            None => 0,
        };
        self.emit(&format!("{} (begin_ctx={})", message, seq));
        TraceCtx { seq }
    }

    /// Emit the end marker matching a previous [`Tracer::begin_ctx`]
    pub fn end_ctx(&self, ctx: TraceCtx, message: &str) {
        self.emit(&format!("{} (end_ctx={})", message, ctx.seq));
    }
}
