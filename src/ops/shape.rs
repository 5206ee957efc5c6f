use ndarray::IxDyn;

use crate::error::{Error, Result};
use crate::model::Node;
use crate::ops::registry::Operator;
use crate::ops::{check_arity, normalize_axis};
use crate::tensor::{dispatch, Tensor};

/// Passes its input through unchanged. Works on every element kind.
#[derive(Debug, Clone, Default)]
pub struct Identity;

/// Reshape with a runtime shape tensor (0 copies, -1 infers)
#[derive(Debug, Clone, Default)]
pub struct Reshape;

/// Collapse to 2-D around `axis`
#[derive(Debug, Clone)]
pub struct Flatten {
    axis: i64,
}

impl Identity {
    pub fn create(node: &Node) -> Result<Box<dyn Operator>> {
        check_arity(node, 1..=1)?;
        Ok(Box::new(Identity))
    }
}

impl Operator for Identity {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Vec<Tensor>> {
        let x = inputs
            .first()
            .ok_or_else(|| Error::InvalidOperator("Identity is missing its input".to_string()))?;
        Ok(vec![(*x).clone()])
    }
}

impl Reshape {
    pub fn create(node: &Node) -> Result<Box<dyn Operator>> {
        check_arity(node, 2..=2)?;
        Ok(Box::new(Reshape))
    }
}

impl Operator for Reshape {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Vec<Tensor>> {
        let (data, shape) = match inputs {
            [data, shape] => (*data, *shape),
            _ => return Err(Error::InvalidOperator("Reshape takes data and shape inputs".to_string())),
        };
        let requested = shape.to_vec::<i64>().ok_or_else(|| {
            Error::InvalidOperator(format!("Reshape shape must be int64, got {}", shape.kind()))
        })?;

        let dims = reshape_dims(data.shape(), &requested)?;
        Ok(vec![reshape_tensor(data, &dims)?])
    }
}

impl Flatten {
    pub fn create(node: &Node) -> Result<Box<dyn Operator>> {
        check_arity(node, 1..=1)?;
        Ok(Box::new(Flatten {
            axis: node.int_attr("axis", 1)?,
        }))
    }
}

impl Operator for Flatten {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Vec<Tensor>> {
        let x = inputs
            .first()
            .ok_or_else(|| Error::InvalidOperator("Flatten is missing its input".to_string()))?;
        let axis = normalize_axis("Flatten", self.axis, x.shape().len())?;
        let outer: usize = x.shape()[..axis].iter().product();
        let inner: usize = x.shape()[axis..].iter().product();
        Ok(vec![reshape_tensor(x, &[outer, inner])?])
    }
}

/// Resolve a Reshape request against the input's dims
pub fn reshape_dims(input: &[usize], requested: &[i64]) -> Result<Vec<usize>> {
    let total: usize = input.iter().product();
    let mut dims = Vec::with_capacity(requested.len());
    let mut inferred = None;

    for (i, &d) in requested.iter().enumerate() {
        match d {
            0 => dims.push(*input.get(i).ok_or_else(|| {
                Error::ShapeMismatch(format!("Reshape copies dim {} but the input has rank {}", i, input.len()))
            })?),
            -1 if inferred.is_none() => {
                inferred = Some(i);
                dims.push(1);
            }
            d if d > 0 => dims.push(d as usize),
            _ => {
                return Err(Error::ShapeMismatch(format!("Reshape cannot use dims {:?}", requested)));
            }
        }
    }

    let known: usize = dims.iter().product();
    if let Some(i) = inferred {
        if known == 0 || total % known != 0 {
            return Err(Error::ShapeMismatch(format!(
                "Reshape cannot infer a dim of {:?} from {} elements",
                requested, total
            )));
        }
        dims[i] = total / known;
    }

    if dims.iter().product::<usize>() != total {
        return Err(Error::ShapeMismatch(format!(
            "Reshape of {:?} to {:?} changes the element count",
            input, dims
        )));
    }
    Ok(dims)
}

fn reshape_tensor(tensor: &Tensor, dims: &[usize]) -> Result<Tensor> {
    dispatch!(tensor.data(), array => {
        let reshaped = array
            .as_standard_layout()
            .into_owned()
            .into_shape(IxDyn(dims))
            .map_err(|e| Error::ShapeMismatch(e.to_string()))?;
        Ok(Tensor::from_array(reshaped))
    })
}
