pub mod registry;
pub mod activations;
pub mod elementwise;
pub mod shape;

// Module files for math subdirectory
pub mod math {
    pub mod matmul;
    pub mod gemm;
}

pub use registry::{Operator, OperatorFactory, OperatorRegistry};

use std::ops::RangeInclusive;

use ndarray::ArrayD;

use crate::error::{Error, Result};
use crate::model::Node;
use crate::tensor::Tensor;

/// Check a node's input count against what the operator accepts
pub(crate) fn check_arity(node: &Node, inputs: RangeInclusive<usize>) -> Result<()> {
    let given = node.inputs.len();
    if !inputs.contains(&given) {
        return Err(Error::InvalidOperator(format!(
            "{} node {} takes {} to {} inputs, got {}",
            node.op_type,
            node.name,
            inputs.start(),
            inputs.end(),
            given
        )));
    }
    if node.outputs.is_empty() {
        return Err(Error::InvalidOperator(format!(
            "{} node {} declares no outputs",
            node.op_type, node.name
        )));
    }
    Ok(())
}

/// Input `index` as a float32 array
pub(crate) fn float_input<'a>(op: &str, inputs: &[&'a Tensor], index: usize) -> Result<&'a ArrayD<f32>> {
    let tensor = inputs
        .get(index)
        .ok_or_else(|| Error::InvalidOperator(format!("{} is missing input {}", op, index)))?;
    tensor.as_array::<f32>().ok_or_else(|| {
        Error::InvalidOperator(format!(
            "{} supports float32 only, input {} is {}",
            op,
            index,
            tensor.kind()
        ))
    })
}

/// Resolve a possibly negative axis against a rank
pub(crate) fn normalize_axis(op: &str, axis: i64, rank: usize) -> Result<usize> {
    let resolved = if axis < 0 { axis + rank as i64 } else { axis };
    if resolved < 0 || resolved > rank as i64 {
        return Err(Error::InvalidOperator(format!(
            "{} axis {} is out of range for rank {}",
            op, axis, rank
        )));
    }
    Ok(resolved as usize)
}
