use ndarray::{IxDyn, Zip};

use crate::error::{Error, Result};
use crate::model::Node;
use crate::ops::registry::Operator;
use crate::ops::{check_arity, float_input};
use crate::tensor::Tensor;

/// Arithmetic applied element by element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryKind {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryKind {
    fn from_op_type(op_type: &str) -> Option<Self> {
        match op_type {
            "Add" => Some(Self::Add),
            "Sub" => Some(Self::Sub),
            "Mul" => Some(Self::Mul),
            "Div" => Some(Self::Div),
            _ => None,
        }
    }

    fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Mul => a * b,
            Self::Div => a / b,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Add => "Add",
            Self::Sub => "Sub",
            Self::Mul => "Mul",
            Self::Div => "Div",
        }
    }
}

/// Two-input arithmetic with multidirectional broadcasting
#[derive(Debug, Clone)]
pub struct Binary {
    kind: BinaryKind,
}

impl Binary {
    pub fn new(kind: BinaryKind) -> Self {
        Self { kind }
    }

    pub fn create(node: &Node) -> Result<Box<dyn Operator>> {
        check_arity(node, 2..=2)?;
        let kind = BinaryKind::from_op_type(&node.op_type).ok_or_else(|| {
            Error::InvalidOperator(format!("{} is not an elementwise arithmetic operator", node.op_type))
        })?;
        Ok(Box::new(Self::new(kind)))
    }
}

impl Operator for Binary {
    fn compute(&self, inputs: &[&Tensor]) -> Result<Vec<Tensor>> {
        let name = self.kind.name();
        let a = float_input(name, inputs, 0)?;
        let b = float_input(name, inputs, 1)?;

        let shape = broadcast_shape(a.shape(), b.shape()).ok_or_else(|| {
            Error::ShapeMismatch(format!(
                "{} cannot broadcast {:?} with {:?}",
                name,
                a.shape(),
                b.shape()
            ))
        })?;

        let dim = IxDyn(&shape);
        let broadcast_err = || Error::ShapeMismatch(format!("{} cannot broadcast to {:?}", name, shape));
        let a = a.broadcast(dim.clone()).ok_or_else(broadcast_err)?;
        let b = b.broadcast(dim).ok_or_else(broadcast_err)?;

        let kind = self.kind;
        let y = Zip::from(&a).and(&b).map_collect(|&x, &y| kind.apply(x, y));
        Ok(vec![Tensor::from_array(y)])
    }
}

/// Numpy-style result shape of two operands, `None` if incompatible
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let rank = a.len().max(b.len());
    let dim_at = |shape: &[usize], i: usize| {
        let offset = rank - shape.len();
        if i < offset {
            1
        } else {
            shape[i - offset]
        }
    };

    (0..rank)
        .map(|i| match (dim_at(a, i), dim_at(b, i)) {
            (x, y) if x == y => Some(x),
            (1, y) => Some(y),
            (x, 1) => Some(x),
            _ => None,
        })
        .collect()
}
