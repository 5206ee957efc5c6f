use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::tensor::Tensor;
use crate::types::ElementKind;

/// Unique identifier for a node in the graph
pub type NodeId = usize;

/// Metadata about the ONNX model
#[derive(Debug, Clone, Default)]
pub struct ModelMetadata {
    pub producer_name: String,
    pub producer_version: String,
    pub domain: String,
    pub model_version: i64,
    pub doc_string: String,
    pub graph_name: String,
    pub ir_version: i64,
}

/// Declared name, element kind and shape of a graph value.
///
/// Symbolic dimensions are recorded as -1.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    pub name: String,
    pub shape: Vec<i64>,
    pub kind: ElementKind,
    pub doc_string: String,
}

/// Node in the computation graph
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub op_type: String,
    pub domain: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub attributes: HashMap<String, Attribute>,
    pub doc_string: String,
}

/// Node attribute
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Float(f32),
    Int(i64),
    String(String),
    Tensor(Tensor),
    Floats(Vec<f32>),
    Ints(Vec<i64>),
    Strings(Vec<String>),
}

impl Node {
    /// Float attribute, or `default` when absent
    pub fn float_attr(&self, name: &str, default: f32) -> Result<f32> {
        match self.attributes.get(name) {
            None => Ok(default),
            Some(Attribute::Float(value)) => Ok(*value),
            Some(other) => Err(self.attr_type_error(name, "a float", other)),
        }
    }

    /// Int attribute, or `default` when absent
    pub fn int_attr(&self, name: &str, default: i64) -> Result<i64> {
        match self.attributes.get(name) {
            None => Ok(default),
            Some(Attribute::Int(value)) => Ok(*value),
            Some(other) => Err(self.attr_type_error(name, "an int", other)),
        }
    }

    fn attr_type_error(&self, name: &str, expected: &str, found: &Attribute) -> Error {
        Error::InvalidOperator(format!(
            "{} attribute {} of node {} must be {}, got {:?}",
            self.op_type, name, self.name, expected, found
        ))
    }
}

/// Graph structure containing nodes and tensors
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub name: String,
    pub nodes: Vec<Node>,
    pub inputs: Vec<TensorInfo>,
    pub outputs: Vec<TensorInfo>,
    pub initializers: HashMap<String, Tensor>,
    pub doc_string: String,
}

impl Graph {
    /// Inputs the caller must feed. Older models also list initializers as
    /// graph inputs; those are excluded.
    pub fn runtime_inputs(&self) -> Vec<TensorInfo> {
        self.inputs
            .iter()
            .filter(|input| !self.initializers.contains_key(&input.name))
            .cloned()
            .collect()
    }
}

/// The complete ONNX model
#[derive(Debug, Clone)]
pub struct OnnxModel {
    pub metadata: ModelMetadata,
    pub graph: Graph,
    pub opset_imports: HashMap<String, i64>,
}

/// Nodes in execution order with their producer dependencies
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    pub nodes: Vec<Node>,
    pub dependencies: HashMap<NodeId, Vec<NodeId>>,
}
