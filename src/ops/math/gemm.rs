use ndarray::IxDyn;

use crate::error::{Error, Result};
use crate::model::Node;
use crate::ops::math::matmul::as_matrix;
use crate::ops::registry::Operator;
use crate::ops::{check_arity, float_input};
use crate::tensor::Tensor;

/// General Matrix Multiplication operator: `Y = alpha * A' * B' + beta * C`
#[derive(Debug, Clone)]
pub struct Gemm {
    alpha: f32,
    beta: f32,
    trans_a: bool,
    trans_b: bool,
}

impl Default for Gemm {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            trans_a: false,
            trans_b: false,
        }
    }
}

impl Gemm {
    pub fn create(node: &Node) -> Result<Box<dyn Operator>> {
        check_arity(node, 2..=3)?;
        Ok(Box::new(Gemm {
            alpha: node.float_attr("alpha", 1.0)?,
            beta: node.float_attr("beta", 1.0)?,
            trans_a: node.int_attr("transA", 0)? != 0,
            trans_b: node.int_attr("transB", 0)? != 0,
        }))
    }
}

impl Operator for Gemm {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Vec<Tensor>> {
        let a = as_matrix("Gemm", float_input("Gemm", inputs, 0)?)?;
        let b = as_matrix("Gemm", float_input("Gemm", inputs, 1)?)?;
        let a = if self.trans_a { a.reversed_axes() } else { a };
        let b = if self.trans_b { b.reversed_axes() } else { b };

        if a.ncols() != b.nrows() {
            return Err(Error::ShapeMismatch(format!(
                "Gemm inner dimensions differ: {:?} x {:?}",
                a.shape(),
                b.shape()
            )));
        }
        let (m, n) = (a.nrows(), b.ncols());

        let mut y = a.dot(&b).into_dyn();
        if self.alpha != 1.0 {
            let alpha = self.alpha;
            y.mapv_inplace(|v| v * alpha);
        }

        // C is optional and unidirectionally broadcast to (M, N)
        if inputs.len() > 2 {
            let c = float_input("Gemm", inputs, 2)?;
            let c = c.broadcast(IxDyn(&[m, n])).ok_or_else(|| {
                Error::ShapeMismatch(format!("Gemm cannot broadcast C {:?} to [{}, {}]", c.shape(), m, n))
            })?;
            let beta = self.beta;
            y.zip_mut_with(&c, |y, &c| *y += beta * c);
        }

        Ok(vec![Tensor::from_array(y)])
    }
}
