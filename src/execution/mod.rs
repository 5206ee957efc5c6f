//! Host interpreter: runs a loaded graph node by node and serves it through
//! the engine boundary.

pub mod engine;
pub mod profiler;

pub use engine::{ExecutionEngine, InterpreterBackend, InterpreterHandle};
pub use profiler::{EventCollector, KernelTiming};
