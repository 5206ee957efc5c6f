//! Engine profiler traces.
//!
//! The engine accumulates one profiler stream over the whole life of a
//! session. [`parse_trace`] turns the raw dump into absolute-time events and
//! [`split_trace`] attributes them to the prediction windows the session
//! recorded, producing one sub-trace per call.

pub mod export;
pub mod publish;

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

pub use publish::{CallContext, LogSink, MemorySink, TelemetrySink, SETUP_EVENTS};

/// One profiler record.
///
/// `ts` and `dur` are microseconds relative to the profiler start; `start`
/// and `end` are the derived absolute times in nanoseconds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TraceEvent {
    #[serde(rename = "cat", default, skip_serializing_if = "String::is_empty")]
    pub category: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "ph", default, skip_serializing_if = "String::is_empty")]
    pub phase: String,
    #[serde(rename = "ts", default, deserialize_with = "deserialize_micros")]
    pub timestamp_us: i64,
    #[serde(rename = "dur", default, deserialize_with = "deserialize_micros")]
    pub duration_us: i64,
    #[serde(rename = "pid", default)]
    pub process_id: i64,
    #[serde(rename = "tid", default)]
    pub thread_id: i64,
    #[serde(
        rename = "args",
        default,
        deserialize_with = "deserialize_args",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub args: BTreeMap<String, String>,
    #[serde(skip)]
    pub start: i64,
    #[serde(skip)]
    pub end: i64,
}

impl TraceEvent {
    /// Identifier of the event within its thread: `name/tid`
    pub fn id(&self) -> String {
        format!("{}/{}", self.name, self.thread_id)
    }

    pub fn duration_ns(&self) -> i64 {
        self.end - self.start
    }

    /// Model load and session setup, paid once per model rather than per call
    pub fn is_setup_event(&self) -> bool {
        SETUP_EVENTS.contains(&self.name.as_str())
    }

    fn resolve(&mut self, profile_start_ns: i64) {
        self.start = profile_start_ns.saturating_add(self.timestamp_us.saturating_mul(1000));
        self.end = self.start.saturating_add(self.duration_us.saturating_mul(1000));
    }
}

// Some profilers write fractional microseconds.
fn deserialize_micros<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Micros {
        Int(i64),
        Float(f64),
    }

    Ok(match Micros::deserialize(deserializer)? {
        Micros::Int(value) => value,
        Micros::Float(value) => value as i64,
    })
}

// Argument values that are not strings keep their JSON text.
fn deserialize_args<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| match value {
            Value::String(text) => (key, text),
            other => (key, other.to_string()),
        })
        .collect())
}

/// A sequence of profiler events anchored at an absolute start time
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Trace {
    /// Nanoseconds since the unix epoch
    pub start_time_ns: i64,
    pub events: Vec<TraceEvent>,
}

impl Trace {
    pub fn new(start_time_ns: i64) -> Self {
        Self {
            start_time_ns,
            events: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Stable sort by absolute start time
    pub fn sort_by_start(&mut self) {
        self.events.sort_by_key(|event| event.start);
    }

    /// Events a telemetry sink would receive
    pub fn published_events(&self) -> impl Iterator<Item = &TraceEvent> {
        self.events.iter().filter(|event| !event.is_setup_event())
    }
}

/// Parse a raw profiler dump.
///
/// Accepts a bare JSON array of records or a chrome trace object with a
/// `traceEvents` array. Record order is preserved.
pub fn parse_trace(raw: &str, profile_start_ns: i64) -> Result<Trace> {
    let document: Value = serde_json::from_str(raw)
        .map_err(|e| Error::MalformedProfile(format!("profile is not valid JSON: {}", e)))?;

    let records = match document {
        Value::Array(records) => Value::Array(records),
        Value::Object(mut object) => object.remove("traceEvents").ok_or_else(|| {
            Error::MalformedProfile("profile object has no traceEvents array".to_string())
        })?,
        other => {
            return Err(Error::MalformedProfile(format!(
                "expected an array of profiler records, got {}",
                other
            )))
        }
    };

    let mut events: Vec<TraceEvent> = serde_json::from_value(records)
        .map_err(|e| Error::MalformedProfile(format!("bad profiler record: {}", e)))?;
    for event in &mut events {
        event.resolve(profile_start_ns);
    }

    Ok(Trace {
        start_time_ns: profile_start_ns,
        events,
    })
}

/// Split a trace into one sub-trace per prediction window.
///
/// Single left-to-right scan over events already in start order, with
/// windows ascending and non-overlapping. An event ending before the current
/// window's end belongs to it if it started after the window opened; earlier
/// events are setup noise and dropped. An event ending at or after the
/// current window's end opens the next window and is kept unconditionally.
/// Past the last window, such events stay in the last window.
///
/// # Panics
///
/// Panics if `starts` and `ends` differ in length.
pub fn split_trace(trace: &Trace, starts: &[i64], ends: &[i64]) -> Vec<Trace> {
    assert_eq!(
        starts.len(),
        ends.len(),
        "prediction windows must be recorded in lockstep"
    );
    if starts.is_empty() {
        return Vec::new();
    }

    let last = starts.len() - 1;
    let mut traces: Vec<Trace> = starts.iter().map(|&start| Trace::new(start)).collect();
    let mut index = 0;

    for event in &trace.events {
        if event.end < ends[index] {
            if event.start > starts[index] {
                traces[index].events.push(event.clone());
            }
        } else {
            if index < last {
                index += 1;
            }
            traces[index].events.push(event.clone());
        }
    }

    traces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str, start: i64, end: i64) -> TraceEvent {
        TraceEvent {
            name: name.to_string(),
            start,
            end,
            ..Default::default()
        }
    }

    fn spans(trace: &Trace) -> Vec<(i64, i64)> {
        trace.events.iter().map(|e| (e.start, e.end)).collect()
    }

    #[test]
    fn test_parse_resolves_absolute_times() {
        let raw = r#"[
            {"cat": "Session", "name": "model_run", "ph": "X", "ts": 10, "dur": 5, "pid": 7, "tid": 3,
             "args": {"op_name": "Gemm", "thread_count": 4}}
        ]"#;
        let trace = parse_trace(raw, 1_000_000).unwrap();
        let event = &trace.events[0];

        assert_eq!(trace.start_time_ns, 1_000_000);
        assert_eq!(event.start, 1_010_000);
        assert_eq!(event.end, 1_015_000);
        assert_eq!(event.id(), "model_run/3");
        assert_eq!(event.args["op_name"], "Gemm");
        assert_eq!(event.args["thread_count"], "4");
    }

    #[test]
    fn test_parse_chrome_object_and_missing_fields() {
        let raw = r#"{"traceEvents": [{"name": "a"}, {"name": "b", "ts": 1.75, "args": null}]}"#;
        let trace = parse_trace(raw, 0).unwrap();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.events[0].duration_ns(), 0);
        assert_eq!(trace.events[1].start, 1000);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for raw in ["not json", "42", r#"{"events": []}"#, r#"[{"ts": "soon"}]"#] {
            assert!(matches!(parse_trace(raw, 0), Err(Error::MalformedProfile(_))), "{}", raw);
        }
    }

    #[test]
    fn test_split_two_windows() {
        let trace = Trace {
            start_time_ns: 0,
            events: vec![
                event("setup", 50, 90),
                event("a", 120, 180),
                event("b", 260, 300),
                event("c", 410, 420),
            ],
        };
        let parts = split_trace(&trace, &[100, 250], &[200, 400]);

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].start_time_ns, 100);
        assert_eq!(spans(&parts[0]), vec![(120, 180)]);
        assert_eq!(parts[1].start_time_ns, 250);
        assert_eq!(spans(&parts[1]), vec![(260, 300), (410, 420)]);
    }

    #[test]
    fn test_split_long_event_advances_one_window() {
        // (150, 390) ends past the second window too, but only moves one ahead
        let trace = Trace {
            start_time_ns: 0,
            events: vec![
                event("a", 110, 190),
                event("long", 150, 390),
                event("b", 320, 330),
                event("late", 420, 460),
            ],
        };
        let parts = split_trace(&trace, &[100, 200, 300], &[195, 290, 400]);

        assert_eq!(spans(&parts[0]), vec![(110, 190)]);
        assert_eq!(spans(&parts[1]), vec![(150, 390)]);
        assert_eq!(spans(&parts[2]), vec![(320, 330), (420, 460)]);
    }

    #[test]
    fn test_split_event_at_window_start_is_dropped() {
        let trace = Trace {
            start_time_ns: 0,
            events: vec![event("edge", 100, 150), event("inside", 101, 150)],
        };
        let parts = split_trace(&trace, &[100], &[200]);
        assert_eq!(spans(&parts[0]), vec![(101, 150)]);
    }

    #[test]
    fn test_split_without_windows() {
        let trace = Trace {
            start_time_ns: 0,
            events: vec![event("a", 1, 2)],
        };
        assert!(split_trace(&trace, &[], &[]).is_empty());
    }

    #[test]
    fn test_split_keeps_one_trace_per_window() {
        let trace = Trace::new(0);
        let parts = split_trace(&trace, &[10, 20, 30], &[15, 25, 35]);
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(Trace::is_empty));
    }

    #[test]
    #[should_panic(expected = "lockstep")]
    fn test_split_mismatched_windows_panics() {
        split_trace(&Trace::new(0), &[1, 2], &[3]);
    }

    #[test]
    fn test_sort_and_published_events() {
        let mut trace = Trace {
            start_time_ns: 0,
            events: vec![
                event("b", 30, 40),
                event("session_initialization", 10, 20),
                event("a", 20, 30),
            ],
        };
        trace.sort_by_start();
        let names: Vec<&str> = trace.events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["session_initialization", "a", "b"]);
        assert_eq!(trace.published_events().count(), 2);
    }
}
