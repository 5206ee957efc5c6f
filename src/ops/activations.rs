use ndarray::Axis;

use crate::error::{Error, Result};
use crate::model::Node;
use crate::ops::registry::Operator;
use crate::ops::{check_arity, float_input, normalize_axis};
use crate::tensor::Tensor;

/// Base struct for simple activation operators
#[derive(Debug, Clone)]
pub struct ActivationBase {
    activation_fn: fn(f32) -> f32,
    name: &'static str,
}

impl ActivationBase {
    fn new(activation_fn: fn(f32) -> f32, name: &'static str) -> Self {
        Self { activation_fn, name }
    }

    fn compute_impl(&self, inputs: &[&Tensor]) -> Result<Vec<Tensor>> {
        let x = float_input(self.name, inputs, 0)?;
        Ok(vec![Tensor::from_array(x.mapv(self.activation_fn))])
    }
}

/// ReLU activation operator
#[derive(Debug, Clone, Default)]
pub struct Relu;

/// LeakyReLU activation operator
#[derive(Debug, Clone)]
pub struct LeakyRelu {
    alpha: f32,
}

/// Sigmoid activation operator
#[derive(Debug, Clone, Default)]
pub struct Sigmoid;

/// Tanh activation operator
#[derive(Debug, Clone, Default)]
pub struct Tanh;

/// Absolute value
#[derive(Debug, Clone, Default)]
pub struct Abs;

/// Softmax over one axis
#[derive(Debug, Clone)]
pub struct Softmax {
    axis: i64,
}

impl Relu {
    pub fn create(node: &Node) -> Result<Box<dyn Operator>> {
        check_arity(node, 1..=1)?;
        Ok(Box::new(Relu))
    }
}

impl Operator for Relu {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Vec<Tensor>> {
        ActivationBase::new(|x| if x > 0.0 { x } else { 0.0 }, "Relu").compute_impl(inputs)
    }
}

impl LeakyRelu {
    pub fn create(node: &Node) -> Result<Box<dyn Operator>> {
        check_arity(node, 1..=1)?;
        Ok(Box::new(LeakyRelu {
            alpha: node.float_attr("alpha", 0.01)?,
        }))
    }
}

impl Operator for LeakyRelu {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Vec<Tensor>> {
        let x = float_input("LeakyRelu", inputs, 0)?;
        let alpha = self.alpha;
        Ok(vec![Tensor::from_array(x.mapv(|v| if v >= 0.0 { v } else { alpha * v }))])
    }
}

impl Sigmoid {
    pub fn create(node: &Node) -> Result<Box<dyn Operator>> {
        check_arity(node, 1..=1)?;
        Ok(Box::new(Sigmoid))
    }
}

impl Operator for Sigmoid {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Vec<Tensor>> {
        ActivationBase::new(|x| 1.0 / (1.0 + (-x).exp()), "Sigmoid").compute_impl(inputs)
    }
}

impl Tanh {
    pub fn create(node: &Node) -> Result<Box<dyn Operator>> {
        check_arity(node, 1..=1)?;
        Ok(Box::new(Tanh))
    }
}

impl Operator for Tanh {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Vec<Tensor>> {
        ActivationBase::new(f32::tanh, "Tanh").compute_impl(inputs)
    }
}

impl Abs {
    pub fn create(node: &Node) -> Result<Box<dyn Operator>> {
        check_arity(node, 1..=1)?;
        Ok(Box::new(Abs))
    }
}

impl Operator for Abs {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Vec<Tensor>> {
        ActivationBase::new(f32::abs, "Abs").compute_impl(inputs)
    }
}

impl Softmax {
    pub fn create(node: &Node) -> Result<Box<dyn Operator>> {
        check_arity(node, 1..=1)?;
        Ok(Box::new(Softmax {
            axis: node.int_attr("axis", -1)?,
        }))
    }
}

impl Operator for Softmax {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Vec<Tensor>> {
        let x = float_input("Softmax", inputs, 0)?;
        let mut y = x.to_owned();
        if y.ndim() == 0 {
            y.fill(1.0);
            return Ok(vec![Tensor::from_array(y)]);
        }

        let axis = normalize_axis("Softmax", self.axis, y.ndim())?;
        if axis == y.ndim() {
            return Err(Error::InvalidOperator(format!(
                "Softmax axis {} is out of range for rank {}",
                self.axis,
                y.ndim()
            )));
        }
        let axis = Axis(axis);

        // Subtract the lane max before exponentiating
        for mut lane in y.lanes_mut(axis) {
            let max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            lane.mapv_inplace(|v| (v - max).exp());
            let sum = lane.sum();
            if sum > 0.0 {
                lane.mapv_inplace(|v| v / sum);
            }
        }
        Ok(vec![Tensor::from_array(y)])
    }
}
