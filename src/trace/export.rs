// Export of traces to chrome://tracing JSON and CSV

use std::fs::{create_dir_all, File};
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;

use crate::error::{Error, Result};

use super::{Trace, TraceEvent};

/// Render a trace as a chrome trace array.
///
/// `ts` is recomputed from the absolute start relative to the trace's own
/// start time, so `parse_trace(output, trace.start_time_ns)` restores the
/// absolute times (to microsecond precision).
pub fn to_chrome_json(trace: &Trace) -> Result<String> {
    let events: Vec<TraceEvent> = trace
        .events
        .iter()
        .map(|event| TraceEvent {
            timestamp_us: (event.start - trace.start_time_ns) / 1000,
            duration_us: (event.end - event.start) / 1000,
            ..event.clone()
        })
        .collect();

    serde_json::to_string_pretty(&events)
        .map_err(|e| Error::MalformedProfile(format!("failed to serialize trace: {}", e)))
}

/// Write a trace as a chrome trace file, creating parent directories
pub fn write_chrome_json<P: AsRef<Path>>(trace: &Trace, path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }

    let mut file = File::create(path)?;
    file.write_all(to_chrome_json(trace)?.as_bytes())?;
    Ok(())
}

#[derive(Serialize)]
struct CsvRow<'a> {
    call: usize,
    name: &'a str,
    category: &'a str,
    start_ns: i64,
    end_ns: i64,
    duration_ns: i64,
}

/// Write per-call traces as CSV, one row per event
pub fn write_csv<W: Write>(traces: &[Trace], writer: W) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    for (call, trace) in traces.iter().enumerate() {
        for event in &trace.events {
            csv_writer
                .serialize(CsvRow {
                    call,
                    name: &event.name,
                    category: &event.category,
                    start_ns: event.start,
                    end_ns: event.end,
                    duration_ns: event.duration_ns(),
                })
                .map_err(io::Error::from)?;
        }
    }

    csv_writer.flush()?;
    Ok(())
}
