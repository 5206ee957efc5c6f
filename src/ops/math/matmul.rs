use ndarray::{ArrayD, ArrayView2, Ix2};

use crate::error::{Error, Result};
use crate::model::Node;
use crate::ops::registry::Operator;
use crate::ops::{check_arity, float_input};
use crate::tensor::Tensor;

/// Matrix multiplication operator
#[derive(Debug, Clone, Default)]
pub struct MatMul;

impl MatMul {
    pub fn create(node: &Node) -> Result<Box<dyn Operator>> {
        check_arity(node, 2..=2)?;
        Ok(Box::new(MatMul))
    }
}

impl Operator for MatMul {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Vec<Tensor>> {
        let a = as_matrix("MatMul", float_input("MatMul", inputs, 0)?)?;
        let b = as_matrix("MatMul", float_input("MatMul", inputs, 1)?)?;

        if a.ncols() != b.nrows() {
            return Err(Error::ShapeMismatch(format!(
                "MatMul inner dimensions differ: {:?} x {:?}",
                a.shape(),
                b.shape()
            )));
        }

        Ok(vec![Tensor::from_array(a.dot(&b).into_dyn())])
    }
}

/// View an n-d array as a matrix. Only rank 2 is supported.
pub(crate) fn as_matrix<'a>(op: &str, array: &'a ArrayD<f32>) -> Result<ArrayView2<'a, f32>> {
    array.view().into_dimensionality::<Ix2>().map_err(|_| {
        Error::ShapeMismatch(format!("{} expects 2-D inputs, got shape {:?}", op, array.shape()))
    })
}
