//! Optional hardware counter capture around a prediction.
//!
//! The counter profiler is an external service. A session starts one capture
//! before handing inputs to the engine and the capture is drained and closed
//! when the [`CaptureGuard`] goes out of scope, including when the engine call
//! fails.

use log::{debug, warn};

use crate::error::Result;

/// Source of hardware counter captures (CUPTI or similar)
pub trait CounterProfiler: Send + Sync {
    /// Begin capturing the named metrics
    fn start(&self, metrics: &[String]) -> Result<Box<dyn CounterCapture>>;
}

/// One running capture
pub trait CounterCapture: Send {
    /// Block until the captured counters have been collected
    fn wait(&mut self) -> Result<()>;

    /// Release the capture
    fn close(&mut self) -> Result<()>;
}

/// Scoped capture: waits for and closes the capture when dropped
pub struct CaptureGuard {
    capture: Option<Box<dyn CounterCapture>>,
}

impl CaptureGuard {
    /// Start a capture; a profiler that fails to start is logged and skipped
    pub fn start(profiler: &dyn CounterProfiler, metrics: &[String]) -> Self {
        let capture = match profiler.start(metrics) {
            Ok(capture) => {
                debug!("Started counter capture for {} metric(s)", metrics.len());
                Some(capture)
            }
            Err(e) => {
                warn!("Failed to start counter capture: {}", e);
                None
            }
        };
        Self { capture }
    }

    /// A guard with nothing to release
    pub fn inactive() -> Self {
        Self { capture: None }
    }

    pub fn is_active(&self) -> bool {
        self.capture.is_some()
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.wait() {
                warn!("Counter capture did not drain: {}", e);
            }
            if let Err(e) = capture.close() {
                warn!("Failed to close counter capture: {}", e);
            }
        }
    }
}
