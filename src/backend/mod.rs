//! Boundary between a session and the inference engine that executes it.
//!
//! An engine is an opaque capability: it loads a model file into a handle,
//! accepts borrowed input buffers, runs the graph and exposes its results as
//! engine-owned buffers. Failures are not returned from the calls; they are
//! left on the [`status`] channel, and [`guarded`] turns them into `Result`s.

pub mod status;

use std::path::Path;

use crate::device::Device;
use crate::error::{Error, Result};
use crate::marshal::{EngineValue, PinnedView};

/// An inference engine able to load models
pub trait Backend: Send + Sync {
    type Handle: BackendHandle;

    /// Short engine name used in logs
    fn name(&self) -> &'static str;

    /// Number of GPUs visible to the engine
    fn gpu_count(&self) -> usize;

    /// Load a model and bind it to a device.
    ///
    /// Returns `None` on failure, with the reason on the error channel.
    fn load(&self, path: &Path, device: Device, profiling: bool) -> Option<Self::Handle>;
}

/// One loaded model. Dropping the handle releases it.
///
/// A handle keeps mutable state across calls (bound inputs, last outputs,
/// profiler buffer), so every method that touches it takes `&mut self`.
pub trait BackendHandle: Send {
    /// Forget inputs and outputs of the previous run
    fn clear(&mut self);

    /// Execute the graph with the given inputs, bound in order to the
    /// graph's declared inputs
    fn run(&mut self, inputs: &[PinnedView<'_>]);

    /// Prepare the results of the last run for reading
    fn convert_output(&mut self);

    fn num_outputs(&self) -> usize;

    /// Result buffer of output slot `index`, valid until the next mutating call
    fn output(&self, index: usize) -> Option<EngineValue<'_>>;

    /// Stop profiling; later runs are not recorded
    fn end_profiling(&mut self);

    /// Wall-clock time profiling started, in nanoseconds since the unix epoch
    fn profiling_start_ns(&self) -> i64;

    /// Raw profiler dump in chrome trace format, `None` on failure
    fn read_profile(&mut self) -> Option<String>;
}

/// Make one engine call and translate the error channel into a `Result`.
///
/// The channel is cleared whether or not it was set, so a failure never
/// leaks into the next call.
pub fn guarded<T, F>(call: F) -> Result<T>
where
    F: FnOnce() -> T,
{
    let value = call();
    match status::take_error() {
        Some(message) => Err(Error::EngineError(message)),
        None => Ok(value),
    }
}
