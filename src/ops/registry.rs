use std::collections::HashMap;
use std::fmt::{self, Debug};

use crate::error::{Error, Result};
use crate::model::Node;
use crate::tensor::Tensor;

/// Trait for implementing ONNX operators.
///
/// An operator is created once per node, with its attributes already
/// resolved, and computed on every run.
pub trait Operator: Send + Sync + Debug {
    /// Compute the node's outputs, in declared output order
    fn compute(&self, inputs: &[&Tensor]) -> Result<Vec<Tensor>>;
}

/// Creates an operator for one node, validating its attributes and arity
pub type OperatorFactory = fn(&Node) -> Result<Box<dyn Operator>>;

/// Registry for ONNX operators
#[derive(Default)]
pub struct OperatorRegistry {
    factories: HashMap<(String, String), OperatorFactory>,
}

impl Debug for OperatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorRegistry")
            .field("operators", &self.operator_names())
            .finish()
    }
}

impl OperatorRegistry {
    /// Create an empty operator registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register an operator
    pub fn register_operator(&mut self, name: &str, domain: &str, factory: OperatorFactory) -> Result<()> {
        let key = (domain.to_string(), name.to_string());

        if self.factories.contains_key(&key) {
            return Err(Error::InvalidOperator(format!(
                "Operator {}.{} is already registered",
                domain, name
            )));
        }

        self.factories.insert(key, factory);
        Ok(())
    }

    pub fn contains(&self, name: &str, domain: &str) -> bool {
        self.factories.contains_key(&(normalize_domain(domain).to_string(), name.to_string()))
    }

    /// Registered operator names, sorted
    pub fn operator_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().map(|(_, name)| name.clone()).collect();
        names.sort();
        names
    }

    /// Initialize the registry with standard operators
    pub fn initialize_standard_operators() -> Self {
        use crate::ops::activations::{LeakyRelu, Relu, Sigmoid, Softmax, Tanh};
        use crate::ops::elementwise::Binary;
        use crate::ops::math::gemm::Gemm;
        use crate::ops::math::matmul::MatMul;
        use crate::ops::shape::{Flatten, Identity, Reshape};

        let standard: [(&str, OperatorFactory); 15] = [
            ("Identity", Identity::create),
            ("Add", Binary::create),
            ("Sub", Binary::create),
            ("Mul", Binary::create),
            ("Div", Binary::create),
            ("Relu", Relu::create),
            ("LeakyRelu", LeakyRelu::create),
            ("Sigmoid", Sigmoid::create),
            ("Tanh", Tanh::create),
            ("Softmax", Softmax::create),
            ("MatMul", MatMul::create),
            ("Gemm", Gemm::create),
            ("Reshape", Reshape::create),
            ("Flatten", Flatten::create),
            ("Abs", crate::ops::activations::Abs::create),
        ];

        let mut registry = Self::new();
        for (name, factory) in standard {
            // Keys are distinct, so registration cannot collide
            let _ = registry.register_operator(name, "", factory);
        }
        registry
    }

    /// Create an operator for a node
    pub fn create_operator_for_node(&self, node: &Node) -> Result<Box<dyn Operator>> {
        let domain = normalize_domain(&node.domain);
        let factory = self
            .factories
            .get(&(domain.to_string(), node.op_type.clone()))
            .ok_or_else(|| {
                Error::InvalidOperator(format!(
                    "Operator {}.{} (node {}) is not supported",
                    if domain.is_empty() { "ai.onnx" } else { domain },
                    node.op_type,
                    node.name
                ))
            })?;
        factory(node)
    }
}

fn normalize_domain(domain: &str) -> &str {
    if domain == "ai.onnx" {
        ""
    } else {
        domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(op_type: &str, domain: &str) -> Node {
        Node {
            id: 0,
            name: "n".to_string(),
            op_type: op_type.to_string(),
            domain: domain.to_string(),
            inputs: vec!["x".to_string()],
            outputs: vec!["y".to_string()],
            attributes: HashMap::new(),
            doc_string: String::new(),
        }
    }

    #[test]
    fn test_standard_operators() {
        let registry = OperatorRegistry::initialize_standard_operators();
        assert!(registry.contains("Gemm", ""));
        assert!(registry.contains("Relu", "ai.onnx"));
        assert!(registry.operator_names().contains(&"Softmax".to_string()));
        assert!(registry.create_operator_for_node(&node("Relu", "ai.onnx")).is_ok());
    }

    #[test]
    fn test_unknown_operator() {
        let registry = OperatorRegistry::initialize_standard_operators();
        let err = registry.create_operator_for_node(&node("Conv", "")).unwrap_err();
        assert!(err.to_string().contains("Conv"));
        assert!(registry.create_operator_for_node(&node("Relu", "com.microsoft")).is_err());
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = OperatorRegistry::new();
        registry
            .register_operator("Relu", "", crate::ops::activations::Relu::create)
            .unwrap();
        assert!(registry
            .register_operator("Relu", "", crate::ops::activations::Relu::create)
            .is_err());
    }
}
