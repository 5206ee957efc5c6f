// Forwarding of per-call sub-traces to an external telemetry collaborator.

use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};

use crate::config::TraceLevel;
use crate::error::Result;

use super::{Trace, TraceEvent};

/// Events describing model load and session setup. They are paid once per
/// model, so they are never attributed to a prediction.
pub const SETUP_EVENTS: [&str; 2] = ["model_loading_from_saved_proto", "session_initialization"];

/// Which prediction a sub-trace belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    /// Zero-based call index; call N has index N-1
    pub index: usize,
    /// Window opening time, nanoseconds since the unix epoch
    pub start_ns: i64,
    /// Window closing time, nanoseconds since the unix epoch
    pub end_ns: i64,
}

/// Destination for trace events (a span publisher, a log, a test buffer)
pub trait TelemetrySink: Send + Sync {
    /// Accept one event of the call described by `context`
    fn publish(&self, event: &TraceEvent, context: &CallContext, level: TraceLevel) -> Result<()>;

    /// Called once after all events of a call were offered
    fn finish_call(&self, _context: &CallContext) {}
}

impl Trace {
    /// Offer every non-setup event to the sink.
    ///
    /// Failures are logged and skipped; the number of events the sink
    /// accepted is returned.
    pub fn publish(&self, sink: &dyn TelemetrySink, context: &CallContext, level: TraceLevel) -> usize {
        let mut published = 0;
        for event in self.published_events() {
            match sink.publish(event, context, level) {
                Ok(()) => published += 1,
                Err(e) => warn!(
                    "Failed to publish trace event {} of call {}: {}",
                    event.id(),
                    context.index,
                    e
                ),
            }
        }
        published
    }
}

/// Writes each event as a debug log line
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn publish(&self, event: &TraceEvent, context: &CallContext, level: TraceLevel) -> Result<()> {
        debug!(
            "[call {}] [{}] {} cat={} start={} end={} args={:?}",
            context.index, level, event.name, event.category, event.start, event.end, event.args
        );
        Ok(())
    }

    fn finish_call(&self, context: &CallContext) {
        debug!("[call {}] finished at {}", context.index, context.end_ns);
    }
}

/// Collects published events in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<(CallContext, TraceEvent)>>>,
    finished: Arc<Mutex<Vec<CallContext>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far, in publication order
    pub fn events(&self) -> Vec<(CallContext, TraceEvent)> {
        lock(&self.events).clone()
    }

    /// Events of one call
    pub fn events_for(&self, index: usize) -> Vec<TraceEvent> {
        lock(&self.events)
            .iter()
            .filter(|(context, _)| context.index == index)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Calls whose publication finished, in order
    pub fn finished_calls(&self) -> Vec<CallContext> {
        lock(&self.finished).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TelemetrySink for MemorySink {
    fn publish(&self, event: &TraceEvent, context: &CallContext, _level: TraceLevel) -> Result<()> {
        lock(&self.events).push((*context, event.clone()));
        Ok(())
    }

    fn finish_call(&self, context: &CallContext) {
        lock(&self.finished).push(*context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn named(name: &str) -> TraceEvent {
        TraceEvent {
            name: name.to_string(),
            ..Default::default()
        }
    }

    struct Flaky;

    impl TelemetrySink for Flaky {
        fn publish(&self, event: &TraceEvent, _context: &CallContext, _level: TraceLevel) -> Result<()> {
            if event.name == "bad" {
                Err(Error::EngineError("span rejected".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_setup_events_are_suppressed() {
        let trace = Trace {
            start_time_ns: 0,
            events: vec![
                named("model_loading_from_saved_proto"),
                named("session_initialization"),
                named("model_run"),
            ],
        };
        let sink = MemorySink::new();
        let context = CallContext { index: 0, start_ns: 0, end_ns: 10 };

        assert_eq!(trace.publish(&sink, &context, TraceLevel::Framework), 1);
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1.name, "model_run");
    }

    #[test]
    fn test_failures_are_skipped() {
        let trace = Trace {
            start_time_ns: 0,
            events: vec![named("ok"), named("bad"), named("ok")],
        };
        let context = CallContext { index: 2, start_ns: 0, end_ns: 0 };
        assert_eq!(trace.publish(&Flaky, &context, TraceLevel::Full), 2);
    }

    #[test]
    fn test_memory_sink_groups_by_call() {
        let sink = MemorySink::new();
        let shared = sink.clone();
        let first = CallContext { index: 0, start_ns: 1, end_ns: 2 };
        let second = CallContext { index: 1, start_ns: 3, end_ns: 4 };

        shared.publish(&named("a"), &first, TraceLevel::Framework).unwrap();
        shared.publish(&named("b"), &second, TraceLevel::Framework).unwrap();
        shared.finish_call(&first);

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.events_for(1)[0].name, "b");
        assert_eq!(sink.finished_calls(), vec![first]);
    }
}
