pub mod error;
pub mod types;
pub mod tensor;
pub mod marshal;
pub mod device;
pub mod config;
pub mod backend;
pub mod counters;
pub mod trace;
pub mod session;
pub mod proto;
pub mod model;
pub mod parser;
pub mod ops;
pub mod execution;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::{element_kind_of, Element, ElementKind};
pub use tensor::{Shape, Tensor, TensorData};
pub use marshal::{from_engine_value, to_engine_buffer, EngineValue, PinnedView, RawData};
pub use device::Device;
pub use config::{SessionOptions, TraceLevel};
pub use backend::{guarded, Backend, BackendHandle};
pub use counters::{CaptureGuard, CounterCapture, CounterProfiler};
pub use trace::{parse_trace, split_trace, CallContext, LogSink, MemorySink, TelemetrySink, Trace, TraceEvent};
pub use session::Session;
pub use model::{ExecutionGraph, Graph, ModelMetadata, Node, NodeId, OnnxModel, TensorInfo};
pub use ops::registry::{Operator, OperatorRegistry};
pub use execution::{ExecutionEngine, InterpreterBackend, InterpreterHandle};
