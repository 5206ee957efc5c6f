// Engine-side profiler. Records spans in wall-clock nanoseconds and dumps
// them as a chrome trace whose timestamps are microseconds relative to the
// profiler start.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::trace::TraceEvent;

/// Category of load and run spans
pub const SESSION_CATEGORY: &str = "Session";
/// Category of per-node spans
pub const NODE_CATEGORY: &str = "Node";
/// Provider name reported for kernel spans
pub const CPU_PROVIDER: &str = "CPUExecutionProvider";

/// Wall-clock span of one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelTiming {
    pub node_name: String,
    pub op_type: String,
    pub start_ns: i64,
    pub end_ns: i64,
}

/// Collects profiler spans for one loaded model
#[derive(Debug)]
pub struct EventCollector {
    start_ns: i64,
    process_id: i64,
    events: Vec<TraceEvent>,
    enabled: bool,
    read: bool,
}

impl EventCollector {
    /// Start profiling at `start_ns` (nanoseconds since the unix epoch)
    pub fn new(start_ns: i64) -> Self {
        Self {
            start_ns,
            process_id: i64::from(std::process::id()),
            events: Vec::new(),
            enabled: true,
            read: false,
        }
    }

    pub fn start_ns(&self) -> i64 {
        self.start_ns
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Record a session-level span such as model loading
    pub fn record_span(&mut self, name: &str, start_ns: i64, end_ns: i64) {
        if !self.enabled {
            return;
        }
        let (ts, end) = self.inward_us(start_ns, end_ns);
        self.push(SESSION_CATEGORY, name.to_string(), ts, end, BTreeMap::new());
    }

    /// Record one graph execution and the kernels it ran.
    ///
    /// Kernel spans are kept inside the run span after rounding, so a
    /// consumer that attributes the run to a time window attributes its
    /// kernels to the same window.
    pub fn record_run(&mut self, start_ns: i64, end_ns: i64, kernels: &[KernelTiming]) {
        if !self.enabled {
            return;
        }
        let (run_ts, run_end) = self.inward_us(start_ns, end_ns);
        self.push(SESSION_CATEGORY, "model_run".to_string(), run_ts, run_end, BTreeMap::new());

        for kernel in kernels {
            let (ts, end) = self.inward_us(kernel.start_ns, kernel.end_ns);
            let ts = ts.clamp(run_ts, run_end);
            let end = end.clamp(ts, run_end);

            let mut args = BTreeMap::new();
            args.insert("op_name".to_string(), kernel.op_type.clone());
            args.insert("provider".to_string(), CPU_PROVIDER.to_string());
            self.push(NODE_CATEGORY, format!("{}_kernel_time", kernel.node_name), ts, end, args);
        }
    }

    /// Stop recording. Spans already collected stay available.
    pub fn end(&mut self) {
        self.enabled = false;
    }

    /// Serialize the collected spans. The dump can be read once.
    pub fn dump(&mut self) -> Result<String> {
        if self.read {
            return Err(Error::UsageError("profile already read".to_string()));
        }
        self.read = true;
        self.enabled = false;
        Ok(serde_json::to_string(&self.events)?)
    }

    fn push(&mut self, category: &str, name: String, ts: i64, end: i64, args: BTreeMap<String, String>) {
        self.events.push(TraceEvent {
            category: category.to_string(),
            name,
            phase: "X".to_string(),
            timestamp_us: ts,
            duration_us: end - ts,
            process_id: self.process_id,
            thread_id: 0,
            args,
            start: 0,
            end: 0,
        });
    }

    // Round a span inward to whole microseconds: the rounded start is
    // strictly after the true start and the rounded end strictly before the
    // true end, collapsing to an empty span when it is too short.
    fn inward_us(&self, start_ns: i64, end_ns: i64) -> (i64, i64) {
        let ts = (start_ns - self.start_ns).div_euclid(1000) + 1;
        let end = -(-(end_ns - self.start_ns)).div_euclid(1000) - 1;
        (ts, end.max(ts))
    }
}
