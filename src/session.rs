//! Inference session: owns one loaded model handle and mediates every
//! exchange with the engine.
//!
//! A session is not safe for concurrent use. `predict` followed by
//! `read_outputs` is one transaction on the engine's mutable state, so every
//! operation takes `&mut self`; share a session across threads only behind a
//! `Mutex`.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};

use crate::backend::{guarded, Backend, BackendHandle};
use crate::config::SessionOptions;
use crate::counters::{CaptureGuard, CounterProfiler};
use crate::error::{Error, Result};
use crate::execution::InterpreterBackend;
use crate::marshal::{from_engine_value, to_engine_buffer};
use crate::tensor::Tensor;
use crate::trace::{parse_trace, split_trace, CallContext, LogSink, TelemetrySink};

/// Wall-clock time in nanoseconds since the unix epoch
pub(crate) fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as i64)
        .unwrap_or(0)
}

/// A loaded model and the trace windows of the predictions made on it
pub struct Session<B: Backend = InterpreterBackend> {
    backend: B,
    handle: Option<B::Handle>,
    options: SessionOptions,
    sink: Arc<dyn TelemetrySink>,
    counters: Option<Arc<dyn CounterProfiler>>,
    start_windows: Vec<i64>,
    end_windows: Vec<i64>,
}

impl Session<InterpreterBackend> {
    /// Load a model with the bundled interpreter engine
    pub fn create(options: SessionOptions) -> Result<Self> {
        Self::create_with_backend(InterpreterBackend::new(), options)
    }
}

impl<B: Backend> Session<B> {
    /// Load a model with the given engine.
    ///
    /// Fails with `FileNotFound` if the path is not a regular file and with
    /// `InvalidDevice` if the device is not available to the engine. Nothing
    /// is loaded when either check fails.
    pub fn create_with_backend(backend: B, options: SessionOptions) -> Result<Self> {
        if !options.model_path.is_file() {
            return Err(Error::FileNotFound(options.model_path.clone()));
        }
        options.device.validate(backend.gpu_count())?;

        info!(
            "Loading {} on {} with {} (batch size {}, trace level {})",
            options.model_path.display(),
            options.device,
            backend.name(),
            options.batch_size,
            options.trace_level
        );

        let handle = guarded(|| backend.load(&options.model_path, options.device, options.trace_enabled()))?
            .ok_or_else(|| {
                Error::EngineError(format!(
                    "{} failed to load {}",
                    backend.name(),
                    options.model_path.display()
                ))
            })?;

        Ok(Self {
            backend,
            handle: Some(handle),
            options,
            sink: Arc::new(LogSink),
            counters: None,
            start_windows: Vec::new(),
            end_windows: Vec::new(),
        })
    }

    /// Send per-call sub-traces to `sink` on close
    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = sink;
        self
    }

    /// Capture hardware counters around each prediction
    pub fn with_counter_profiler(mut self, profiler: Arc<dyn CounterProfiler>) -> Self {
        self.counters = Some(profiler);
        self
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }

    /// Number of prediction windows waiting to be published
    pub fn recorded_calls(&self) -> usize {
        self.start_windows.len()
    }

    /// Run the model on `inputs`, bound in order to the graph's inputs.
    ///
    /// Inputs are lent to the engine without copying for the duration of the
    /// call. An engine failure is returned as `EngineError`; the session stays
    /// usable, but outputs of the failed call must not be read.
    pub fn predict(&mut self, inputs: &[Tensor]) -> Result<()> {
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| Error::UsageError("predict called on a closed session".to_string()))?;
        if inputs.is_empty() {
            return Err(Error::EmptyInput);
        }

        let views = inputs.iter().map(to_engine_buffer).collect::<Result<Vec<_>>>()?;

        guarded(|| handle.clear())?;

        let _capture = match &self.counters {
            Some(profiler) if self.options.trace_level.captures_counters() => {
                CaptureGuard::start(profiler.as_ref(), &self.options.gpu_metrics)
            }
            _ => CaptureGuard::inactive(),
        };

        let start = now_ns();
        let result = guarded(|| handle.run(&views));
        let end = now_ns();

        if self.options.trace_enabled() {
            self.start_windows.push(start);
            self.end_windows.push(end);
        }
        debug!(
            "Predicted with {} input(s) in {} ns (call {})",
            views.len(),
            end - start,
            self.start_windows.len()
        );

        result
    }

    /// Copy the outputs of the last prediction out of the engine, in output
    /// slot order
    pub fn read_outputs(&mut self) -> Result<Vec<Tensor>> {
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| Error::UsageError("read_outputs called on a closed session".to_string()))?;

        guarded(|| handle.convert_output())?;

        let count = handle.num_outputs();
        if count == 0 {
            return Err(Error::NoOutputs);
        }

        (0..count)
            .map(|index| {
                let value = handle.output(index).ok_or_else(|| {
                    Error::EngineError(format!("output slot {} of {} is missing", index, count))
                })?;
                from_engine_value(&value)
            })
            .collect()
    }

    /// `predict` and `read_outputs` as one call
    pub fn run(&mut self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        self.predict(inputs)?;
        self.read_outputs()
    }

    /// Publish pending traces and release the engine handle.
    ///
    /// Safe to call any number of times. Trace failures are logged, never
    /// returned.
    pub fn close(&mut self) {
        let mut handle = match self.handle.take() {
            Some(handle) => handle,
            None => return,
        };

        if self.options.trace_enabled() {
            match self.publish_traces(&mut handle) {
                Ok(published) => debug!(
                    "Published {} trace event(s) for {} call(s)",
                    published,
                    self.start_windows.len()
                ),
                Err(e) => warn!(
                    "Failed to publish traces for {}: {}",
                    self.options.model_path.display(),
                    e
                ),
            }
        }
        self.start_windows.clear();
        self.end_windows.clear();

        drop(handle);
        debug!("Closed session for {}", self.options.model_path.display());
    }

    fn publish_traces(&self, handle: &mut B::Handle) -> Result<usize> {
        guarded(|| handle.end_profiling())?;
        let profile_start = guarded(|| handle.profiling_start_ns())?;
        let raw = guarded(|| handle.read_profile())?
            .ok_or_else(|| Error::MalformedProfile("engine returned no profile".to_string()))?;

        let trace = parse_trace(&raw, profile_start)?;
        let calls = split_trace(&trace, &self.start_windows, &self.end_windows);

        let mut published = 0;
        for (index, call) in calls.iter().enumerate() {
            let context = CallContext {
                index,
                start_ns: self.start_windows[index],
                end_ns: self.end_windows[index],
            };
            published += call.publish(self.sink.as_ref(), &context, self.options.trace_level);
            self.sink.finish_call(&context);
        }
        Ok(published)
    }
}

impl<B: Backend> Drop for Session<B> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::status;
    use crate::device::Device;
    use crate::marshal::{EngineValue, PinnedView, RawData};
    use crate::types::ElementKind;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Echoes its first input back, or fails every run when `fail` is set
    struct EchoBackend {
        gpus: usize,
        fail: bool,
        drops: Arc<AtomicUsize>,
    }

    struct EchoHandle {
        fail: bool,
        shape: Vec<i64>,
        bytes: Vec<u8>,
        kind: ElementKind,
        has_output: bool,
        drops: Arc<AtomicUsize>,
    }

    impl Backend for EchoBackend {
        type Handle = EchoHandle;

        fn name(&self) -> &'static str {
            "echo"
        }

        fn gpu_count(&self) -> usize {
            self.gpus
        }

        fn load(&self, _path: &Path, _device: Device, _profiling: bool) -> Option<EchoHandle> {
            Some(EchoHandle {
                fail: self.fail,
                shape: Vec::new(),
                bytes: Vec::new(),
                kind: ElementKind::Undefined,
                has_output: false,
                drops: self.drops.clone(),
            })
        }
    }

    impl BackendHandle for EchoHandle {
        fn clear(&mut self) {
            self.has_output = false;
        }

        fn run(&mut self, inputs: &[PinnedView<'_>]) {
            if self.fail {
                status::set_error("kernel launch failed");
                return;
            }
            if let RawData::Bytes(bytes) = inputs[0].data() {
                self.bytes = bytes.to_vec();
                self.shape = inputs[0].shape().to_vec();
                self.kind = inputs[0].kind();
                self.has_output = true;
            }
        }

        fn convert_output(&mut self) {}

        fn num_outputs(&self) -> usize {
            usize::from(self.has_output)
        }

        fn output(&self, index: usize) -> Option<EngineValue<'_>> {
            (index == 0 && self.has_output).then(|| EngineValue {
                kind: self.kind,
                shape: &self.shape,
                data: RawData::Bytes(&self.bytes),
            })
        }

        fn end_profiling(&mut self) {}

        fn profiling_start_ns(&self) -> i64 {
            0
        }

        fn read_profile(&mut self) -> Option<String> {
            Some("[]".to_string())
        }
    }

    impl Drop for EchoHandle {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn model_file() -> tempfile::NamedTempFile {
        tempfile::NamedTempFile::new().unwrap()
    }

    fn echo(fail: bool) -> (EchoBackend, Arc<AtomicUsize>) {
        let drops = Arc::new(AtomicUsize::new(0));
        (EchoBackend { gpus: 0, fail, drops: drops.clone() }, drops)
    }

    #[test]
    fn test_missing_model_file() {
        let (backend, drops) = echo(false);
        let err = Session::create_with_backend(backend, SessionOptions::new("/no/such/model.onnx")).err().unwrap();
        assert!(matches!(err, Error::FileNotFound(_)));
        assert_eq!(drops.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_gpu_without_hardware() {
        let file = model_file();
        let (backend, _) = echo(false);
        let options = SessionOptions::new(file.path()).set_device(Device::Cuda(0));
        let err = Session::create_with_backend(backend, options).err().unwrap();
        assert!(matches!(err, Error::InvalidDevice(_)));
    }

    #[test]
    fn test_echo_round_trip_and_close() {
        let file = model_file();
        let (backend, drops) = echo(false);
        let mut session = Session::create_with_backend(backend, SessionOptions::new(file.path())).unwrap();

        let input = Tensor::from_shape_vec(&[2], vec![3i16, -4]).unwrap();
        let outputs = session.run(&[input.clone()]).unwrap();
        assert_eq!(outputs, vec![input]);

        session.close();
        session.close();
        assert!(session.is_closed());
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        drop(session);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_usage_after_close() {
        let file = model_file();
        let (backend, _) = echo(false);
        let mut session = Session::create_with_backend(backend, SessionOptions::new(file.path())).unwrap();
        session.close();

        let input = Tensor::from_shape_vec(&[1], vec![1u8]).unwrap();
        assert!(matches!(session.predict(&[input]), Err(Error::UsageError(_))));
        assert!(matches!(session.read_outputs(), Err(Error::UsageError(_))));
    }

    #[test]
    fn test_engine_error_is_recoverable_and_not_leaked() {
        let file = model_file();
        let (backend, _) = echo(true);
        let options = SessionOptions::new(file.path()).set_trace_level(crate::config::TraceLevel::Framework);
        let mut session = Session::create_with_backend(backend, options).unwrap();

        let input = Tensor::from_shape_vec(&[1], vec![1.0f32]).unwrap();
        let err = session.predict(&[input]).unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("kernel launch failed"));
        assert!(!status::has_error());
        assert_eq!(session.recorded_calls(), 1);

        assert!(matches!(session.read_outputs(), Err(Error::NoOutputs)));
    }

    #[test]
    fn test_empty_input_leaves_session_usable() {
        let file = model_file();
        let (backend, _) = echo(false);
        let mut session = Session::create_with_backend(backend, SessionOptions::new(file.path())).unwrap();

        assert!(matches!(session.predict(&[]), Err(Error::EmptyInput)));
        let input = Tensor::from_shape_vec(&[1], vec![9u32]).unwrap();
        assert!(session.predict(&[input]).is_ok());
    }
}
