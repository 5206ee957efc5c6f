use std::collections::HashMap;
use std::path::Path;

use bytes::Bytes;
use log::{debug, info};

use crate::backend::{status, Backend, BackendHandle};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::marshal::{self, EngineValue, PinnedView, RawData};
use crate::model::{ExecutionGraph, Node, NodeId, OnnxModel, TensorInfo};
use crate::ops::{Operator, OperatorRegistry};
use crate::parser::{GraphBuilder, OnnxModelLoader};
use crate::session::now_ns;
use crate::tensor::Tensor;
use crate::types::ElementKind;

use super::profiler::{EventCollector, KernelTiming};

/// Executes a loaded model node by node on the host
pub struct ExecutionEngine {
    /// The ONNX model
    model: OnnxModel,
    /// Nodes in execution order
    execution_graph: ExecutionGraph,
    /// Mapping from node IDs to operators
    node_operators: HashMap<NodeId, Box<dyn Operator>>,
    /// Inputs the caller feeds, in declared order
    input_infos: Vec<TensorInfo>,
}

impl ExecutionEngine {
    /// Create an engine with the standard operator set
    pub fn new(model: OnnxModel) -> Result<Self> {
        Self::with_registry(model, &OperatorRegistry::initialize_standard_operators())
    }

    /// Create an engine, resolving every node against `registry`.
    ///
    /// Unsupported operators and bad attributes are reported here rather
    /// than on the first run.
    pub fn with_registry(model: OnnxModel, registry: &OperatorRegistry) -> Result<Self> {
        let execution_graph = GraphBuilder::build_graph(&model)?;

        let mut node_operators = HashMap::with_capacity(execution_graph.nodes.len());
        for node in &execution_graph.nodes {
            node_operators.insert(node.id, registry.create_operator_for_node(node)?);
        }

        let input_infos = model.graph.runtime_inputs();
        Ok(Self {
            model,
            execution_graph,
            node_operators,
            input_infos,
        })
    }

    pub fn execution_graph(&self) -> &ExecutionGraph {
        &self.execution_graph
    }

    pub fn input_infos(&self) -> &[TensorInfo] {
        &self.input_infos
    }

    /// Run the model, reporting each node's wall-clock span to `observe`.
    /// Inputs bind in order to the declared inputs and outputs come back in
    /// declared order.
    pub fn run_observed<F>(&self, inputs: Vec<Tensor>, mut observe: F) -> Result<Vec<Tensor>>
    where
        F: FnMut(&Node, i64, i64),
    {
        if inputs.len() != self.input_infos.len() {
            return Err(Error::EngineError(format!(
                "model takes {} inputs, got {}",
                self.input_infos.len(),
                inputs.len()
            )));
        }

        let mut values: HashMap<&str, Tensor> = HashMap::new();
        for (info, tensor) in self.input_infos.iter().zip(inputs) {
            Self::check_input(info, &tensor)?;
            values.insert(info.name.as_str(), tensor);
        }

        for node in &self.execution_graph.nodes {
            let operator = self
                .node_operators
                .get(&node.id)
                .ok_or_else(|| Error::EngineError(format!("node {} has no operator", node.name)))?;

            let start = now_ns();
            let results = {
                let args = node
                    .inputs
                    .iter()
                    .filter(|name| !name.is_empty())
                    .map(|name| self.lookup(&values, name))
                    .collect::<Result<Vec<&Tensor>>>()?;
                operator.compute(&args).map_err(|e| {
                    Error::EngineError(format!("{} node {} failed: {}", node.op_type, node.name, e))
                })?
            };
            observe(node, start, now_ns());

            if results.len() < node.outputs.iter().filter(|name| !name.is_empty()).count() {
                return Err(Error::EngineError(format!(
                    "node {} produced {} outputs, declares {}",
                    node.name,
                    results.len(),
                    node.outputs.len()
                )));
            }
            for (name, tensor) in node.outputs.iter().zip(results) {
                if !name.is_empty() {
                    values.insert(name.as_str(), tensor);
                }
            }
        }

        self.model
            .graph
            .outputs
            .iter()
            .map(|output| self.lookup(&values, &output.name).map(Tensor::clone))
            .collect()
    }

    fn lookup<'a>(&'a self, values: &'a HashMap<&str, Tensor>, name: &str) -> Result<&'a Tensor> {
        values
            .get(name)
            .or_else(|| self.model.graph.initializers.get(name))
            .ok_or_else(|| Error::EngineError(format!("value {} is not available", name)))
    }

    fn check_input(info: &TensorInfo, tensor: &Tensor) -> Result<()> {
        if info.kind != ElementKind::Undefined && info.kind != tensor.kind() {
            return Err(Error::EngineError(format!(
                "input {} expects {}, got {}",
                info.name,
                info.kind,
                tensor.kind()
            )));
        }

        // An empty declared shape means the model does not constrain it
        if info.shape.is_empty() {
            return Ok(());
        }
        let fits = info.shape.len() == tensor.shape().len()
            && info
                .shape
                .iter()
                .zip(tensor.shape())
                .all(|(&declared, &actual)| declared < 0 || declared as usize == actual);
        if !fits {
            return Err(Error::EngineError(format!(
                "input {} expects shape {:?}, got {:?}",
                info.name,
                info.shape,
                tensor.shape()
            )));
        }
        Ok(())
    }
}

/// Host interpreter exposed through the engine boundary
#[derive(Debug)]
pub struct InterpreterBackend {
    registry: OperatorRegistry,
}

impl Default for InterpreterBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InterpreterBackend {
    pub fn new() -> Self {
        Self::with_registry(OperatorRegistry::initialize_standard_operators())
    }

    pub fn with_registry(registry: OperatorRegistry) -> Self {
        Self { registry }
    }

    fn load_engine(&self, path: &Path, profiling: bool) -> Result<InterpreterHandle> {
        let profile_start = now_ns();
        let model = OnnxModelLoader::load_model(path)?;
        let loaded = now_ns();
        let engine = ExecutionEngine::with_registry(model, &self.registry)?;
        let ready = now_ns();

        let profiler = profiling.then(|| {
            let mut collector = EventCollector::new(profile_start);
            collector.record_span("model_loading_from_saved_proto", profile_start, loaded);
            collector.record_span("session_initialization", loaded, ready);
            collector
        });

        info!(
            "Interpreter loaded {} ({} nodes, {} inputs)",
            path.display(),
            engine.execution_graph().nodes.len(),
            engine.input_infos().len()
        );

        Ok(InterpreterHandle {
            engine,
            profiler,
            results: Vec::new(),
            outputs: Vec::new(),
        })
    }
}

impl Backend for InterpreterBackend {
    type Handle = InterpreterHandle;

    fn name(&self) -> &'static str {
        "interpreter"
    }

    fn gpu_count(&self) -> usize {
        0
    }

    fn load(&self, path: &Path, device: Device, profiling: bool) -> Option<Self::Handle> {
        if device.is_gpu() {
            status::set_error(format!("the interpreter runs on the host only, cannot bind {}", device));
            return None;
        }
        report(self.load_engine(path, profiling))
    }
}

// Engine-owned copy of one result
#[derive(Debug)]
struct OutputBuffer {
    kind: ElementKind,
    shape: Vec<i64>,
    data: OutputData,
}

#[derive(Debug)]
enum OutputData {
    Bytes(Bytes),
    Strings(Vec<String>),
}

impl OutputBuffer {
    fn from_tensor(tensor: &Tensor) -> Result<Self> {
        let dense;
        let tensor = if tensor.is_dense() {
            tensor
        } else {
            dense = tensor.to_standard_layout();
            &dense
        };

        let data = match marshal::raw_data(tensor)? {
            RawData::Bytes(bytes) => OutputData::Bytes(Bytes::copy_from_slice(bytes)),
            RawData::Strings(strings) => OutputData::Strings(strings.to_vec()),
        };
        Ok(Self {
            kind: tensor.kind(),
            shape: tensor.shape().iter().map(|&d| d as i64).collect(),
            data,
        })
    }

    fn value(&self) -> EngineValue<'_> {
        EngineValue {
            kind: self.kind,
            shape: &self.shape,
            data: match &self.data {
                OutputData::Bytes(bytes) => RawData::Bytes(bytes),
                OutputData::Strings(strings) => RawData::Strings(strings),
            },
        }
    }
}

/// A model loaded into the interpreter
pub struct InterpreterHandle {
    engine: ExecutionEngine,
    profiler: Option<EventCollector>,
    results: Vec<Tensor>,
    outputs: Vec<OutputBuffer>,
}

impl BackendHandle for InterpreterHandle {
    fn clear(&mut self) {
        self.results.clear();
        self.outputs.clear();
    }

    fn run(&mut self, inputs: &[PinnedView<'_>]) {
        let tensors = match inputs.iter().map(PinnedView::to_tensor).collect::<Result<Vec<_>>>() {
            Ok(tensors) => tensors,
            Err(e) => return status::set_error(e.to_string()),
        };

        let mut kernels = Vec::new();
        let start = now_ns();
        let result = self.engine.run_observed(tensors, |node, start_ns, end_ns| {
            kernels.push(KernelTiming {
                node_name: node.name.clone(),
                op_type: node.op_type.clone(),
                start_ns,
                end_ns,
            })
        });
        let end = now_ns();

        if let Some(profiler) = self.profiler.as_mut() {
            profiler.record_run(start, end, &kernels);
        }
        debug!("Interpreter ran {} nodes in {} ns", kernels.len(), end - start);

        if let Some(results) = report(result) {
            self.results = results;
        }
    }

    fn convert_output(&mut self) {
        let converted = self.results.iter().map(OutputBuffer::from_tensor).collect::<Result<Vec<_>>>();
        if let Some(outputs) = report(converted) {
            self.outputs = outputs;
            self.results.clear();
        }
    }

    fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    fn output(&self, index: usize) -> Option<EngineValue<'_>> {
        self.outputs.get(index).map(OutputBuffer::value)
    }

    fn end_profiling(&mut self) {
        if let Some(profiler) = self.profiler.as_mut() {
            profiler.end();
        }
    }

    fn profiling_start_ns(&self) -> i64 {
        self.profiler.as_ref().map_or(0, EventCollector::start_ns)
    }

    fn read_profile(&mut self) -> Option<String> {
        match self.profiler.as_mut() {
            Some(profiler) => report(profiler.dump()),
            None => {
                status::set_error("profiling was not enabled for this model");
                None
            }
        }
    }
}

// Leave a failure on the error channel
fn report<T>(result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            status::set_error(e.to_string());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::guarded;
    use crate::marshal::{from_engine_value, to_engine_buffer};
    use crate::model::{Graph, ModelMetadata};

    fn info(name: &str, shape: Vec<i64>) -> TensorInfo {
        TensorInfo {
            name: name.to_string(),
            shape,
            kind: ElementKind::Float32,
            doc_string: String::new(),
        }
    }

    fn node(id: NodeId, op_type: &str, inputs: &[&str], output: &str) -> Node {
        Node {
            id,
            name: format!("{}_{}", op_type.to_lowercase(), id),
            op_type: op_type.to_string(),
            domain: String::new(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: vec![output.to_string()],
            attributes: HashMap::new(),
            doc_string: String::new(),
        }
    }

    // y = relu(x + bias)
    fn bias_relu_model() -> OnnxModel {
        let mut graph = Graph {
            name: "bias_relu".to_string(),
            nodes: vec![node(0, "Relu", &["sum"], "y"), node(1, "Add", &["x", "bias"], "sum")],
            inputs: vec![info("x", vec![-1, 2])],
            outputs: vec![info("y", vec![-1, 2])],
            ..Default::default()
        };
        graph.initializers.insert(
            "bias".to_string(),
            Tensor::from_shape_vec(&[2], vec![1.0f32, -1.0]).unwrap(),
        );
        OnnxModel {
            metadata: ModelMetadata::default(),
            graph,
            opset_imports: HashMap::new(),
        }
    }

    #[test]
    fn test_engine_runs_in_dependency_order() {
        let engine = ExecutionEngine::new(bias_relu_model()).unwrap();
        let x = Tensor::from_shape_vec(&[2, 2], vec![1.0f32, 1.0, -3.0, 4.0]).unwrap();

        let mut visited = Vec::new();
        let outputs = engine
            .run_observed(vec![x], |node, start, end| {
                assert!(end >= start);
                visited.push(node.op_type.clone());
            })
            .unwrap();

        assert_eq!(visited, vec!["Add", "Relu"]);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].to_vec::<f32>().unwrap(), vec![2.0, 0.0, 0.0, 3.0]);
    }

    #[test]
    fn test_engine_checks_inputs() {
        let engine = ExecutionEngine::new(bias_relu_model()).unwrap();
        assert!(engine.run_observed(vec![], |_, _, _| {}).is_err());

        let wrong_kind = Tensor::from_shape_vec(&[1, 2], vec![1i64, 2]).unwrap();
        assert!(engine.run_observed(vec![wrong_kind], |_, _, _| {}).is_err());

        let wrong_shape = Tensor::from_shape_vec(&[1, 3], vec![1.0f32, 2.0, 3.0]).unwrap();
        assert!(engine.run_observed(vec![wrong_shape], |_, _, _| {}).is_err());
    }

    #[test]
    fn test_unsupported_operator_fails_at_load() {
        let mut model = bias_relu_model();
        model.graph.nodes[0].op_type = "Conv".to_string();
        assert!(matches!(ExecutionEngine::new(model), Err(Error::InvalidOperator(_))));
    }

    #[test]
    fn test_handle_round_trip_through_buffers() {
        let mut handle = InterpreterHandle {
            engine: ExecutionEngine::new(bias_relu_model()).unwrap(),
            profiler: Some(EventCollector::new(now_ns())),
            results: Vec::new(),
            outputs: Vec::new(),
        };

        let x = Tensor::from_shape_vec(&[1, 2], vec![0.5f32, 3.0]).unwrap();
        let view = to_engine_buffer(&x).unwrap();
        guarded(|| handle.run(&[view])).unwrap();
        guarded(|| handle.convert_output()).unwrap();
        assert_eq!(handle.num_outputs(), 1);

        let y = from_engine_value(&handle.output(0).unwrap()).unwrap();
        assert_eq!(y.to_vec::<f32>().unwrap(), vec![1.5, 2.0]);
        assert!(handle.output(1).is_none());

        handle.end_profiling();
        let profile = guarded(|| handle.read_profile()).unwrap().unwrap();
        assert!(profile.contains("model_run"));
        assert!(profile.contains("add_1_kernel_time"));
        assert!(guarded(|| handle.read_profile()).is_err());
    }

    #[test]
    fn test_handle_reports_run_failure() {
        let mut handle = InterpreterHandle {
            engine: ExecutionEngine::new(bias_relu_model()).unwrap(),
            profiler: None,
            results: Vec::new(),
            outputs: Vec::new(),
        };

        let x = Tensor::from_shape_vec(&[3], vec![1.0f32, 2.0, 3.0]).unwrap();
        let view = to_engine_buffer(&x).unwrap();
        assert!(matches!(guarded(|| handle.run(&[view])), Err(Error::EngineError(_))));
        guarded(|| handle.convert_output()).unwrap();
        assert_eq!(handle.num_outputs(), 0);
        assert!(guarded(|| handle.read_profile()).is_err());
    }

    #[test]
    fn test_backend_rejects_gpu() {
        let backend = InterpreterBackend::new();
        assert_eq!(backend.gpu_count(), 0);
        let result = guarded(|| backend.load(Path::new("model.onnx"), Device::Cuda(0), false));
        assert!(matches!(result, Err(Error::EngineError(_))));
    }
}
