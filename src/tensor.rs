use std::fmt;

use half::f16;
use ndarray::{ArrayD, IxDyn};

use crate::error::{Error, Result};
use crate::types::{Element, ElementKind};

/// Shape of a tensor
pub type Shape = Vec<usize>;

/// Owned, typed storage of a tensor. One variant per supported element kind.
#[derive(Clone, PartialEq)]
pub enum TensorData {
    Float32(ArrayD<f32>),
    Float64(ArrayD<f64>),
    Int8(ArrayD<i8>),
    Int16(ArrayD<i16>),
    Int32(ArrayD<i32>),
    Int64(ArrayD<i64>),
    UInt8(ArrayD<u8>),
    UInt16(ArrayD<u16>),
    UInt32(ArrayD<u32>),
    UInt64(ArrayD<u64>),
    Bool(ArrayD<bool>),
    Float16(ArrayD<f16>),
    String(ArrayD<String>),
}

/// Run `$body` with `$array` bound to the typed array inside a `TensorData`.
macro_rules! dispatch {
    ($data:expr, $array:ident => $body:expr) => {
        match $data {
            $crate::tensor::TensorData::Float32($array) => $body,
            $crate::tensor::TensorData::Float64($array) => $body,
            $crate::tensor::TensorData::Int8($array) => $body,
            $crate::tensor::TensorData::Int16($array) => $body,
            $crate::tensor::TensorData::Int32($array) => $body,
            $crate::tensor::TensorData::Int64($array) => $body,
            $crate::tensor::TensorData::UInt8($array) => $body,
            $crate::tensor::TensorData::UInt16($array) => $body,
            $crate::tensor::TensorData::UInt32($array) => $body,
            $crate::tensor::TensorData::UInt64($array) => $body,
            $crate::tensor::TensorData::Bool($array) => $body,
            $crate::tensor::TensorData::Float16($array) => $body,
            $crate::tensor::TensorData::String($array) => $body,
        }
    };
}

pub(crate) use dispatch;

/// Dense multi-dimensional tensor owned by the host.
///
/// Shape and element count always agree: every constructor checks the
/// buffer length against the product of the dimensions.
#[derive(Clone, PartialEq)]
pub struct Tensor {
    data: TensorData,
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor {{ kind: {}, shape: {:?}, dense: {} }}",
               self.kind(), self.shape(), self.is_dense())
    }
}

impl fmt::Debug for TensorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        dispatch!(self, array => write!(f, "{:?}", array))
    }
}

impl Tensor {
    /// Create a tensor from a shape and a flat row-major buffer
    pub fn from_shape_vec<T: Element>(shape: &[usize], data: Vec<T>) -> Result<Self> {
        let expected = shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| Error::ShapeMismatch(format!("shape {:?} overflows the element count", shape)))?;
        if expected != data.len() {
            return Err(Error::ShapeMismatch(format!(
                "shape {:?} needs {} elements of {}, buffer holds {}",
                shape, expected, T::KIND, data.len()
            )));
        }

        let array = ArrayD::from_shape_vec(IxDyn(shape), data)
            .map_err(|e| Error::ShapeMismatch(e.to_string()))?;
        Ok(Self::from_array(array))
    }

    /// Wrap an existing n-d array
    pub fn from_array<T: Element>(array: ArrayD<T>) -> Self {
        Self { data: T::wrap(array) }
    }

    pub fn from_data(data: TensorData) -> Self {
        Self { data }
    }

    /// Element kind of the tensor
    pub fn kind(&self) -> ElementKind {
        match &self.data {
            TensorData::Float32(_) => ElementKind::Float32,
            TensorData::Float64(_) => ElementKind::Float64,
            TensorData::Int8(_) => ElementKind::Int8,
            TensorData::Int16(_) => ElementKind::Int16,
            TensorData::Int32(_) => ElementKind::Int32,
            TensorData::Int64(_) => ElementKind::Int64,
            TensorData::UInt8(_) => ElementKind::UInt8,
            TensorData::UInt16(_) => ElementKind::UInt16,
            TensorData::UInt32(_) => ElementKind::UInt32,
            TensorData::UInt64(_) => ElementKind::UInt64,
            TensorData::Bool(_) => ElementKind::Bool,
            TensorData::Float16(_) => ElementKind::Float16,
            TensorData::String(_) => ElementKind::String,
        }
    }

    pub fn shape(&self) -> &[usize] {
        dispatch!(&self.data, array => array.shape())
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        dispatch!(&self.data, array => array.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the backing buffer is contiguous in row-major order, which
    /// is the only layout the engine can read through a bare address.
    pub fn is_dense(&self) -> bool {
        dispatch!(&self.data, array => array.is_standard_layout())
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn into_data(self) -> TensorData {
        self.data
    }

    /// Borrow the typed array, `None` if `T` is not the tensor's element type
    pub fn as_array<T: Element>(&self) -> Option<&ArrayD<T>> {
        T::unwrap_ref(&self.data)
    }

    /// Borrow the flat buffer; `None` on a type mismatch or a strided layout
    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        self.as_array::<T>()?.as_slice()
    }

    /// Copy the elements out in logical row-major order
    pub fn to_vec<T: Element>(&self) -> Option<Vec<T>> {
        self.as_array::<T>().map(|array| array.iter().cloned().collect())
    }

    /// Copy into a dense row-major tensor
    pub fn to_standard_layout(&self) -> Tensor {
        dispatch!(&self.data, array => Tensor::from_array(array.as_standard_layout().into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_shape_vec() {
        let tensor = Tensor::from_shape_vec(&[2, 3], vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(tensor.kind(), ElementKind::Float32);
        assert_eq!(tensor.shape(), &[2, 3]);
        assert_eq!(tensor.len(), 6);
        assert!(tensor.is_dense());
        assert_eq!(tensor.as_slice::<f32>().unwrap()[4], 5.0);
        assert!(tensor.as_slice::<f64>().is_none());
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let err = Tensor::from_shape_vec(&[2, 2], vec![1i64, 2, 3]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch(_)));
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_scalar_and_empty_shapes() {
        let scalar = Tensor::from_shape_vec(&[], vec![7u8]).unwrap();
        assert_eq!(scalar.len(), 1);
        assert!(scalar.shape().is_empty());

        let empty = Tensor::from_shape_vec::<i32>(&[0, 4], vec![]).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_overflowing_shape_is_rejected() {
        let err = Tensor::from_shape_vec::<u8>(&[usize::MAX, 2], vec![]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch(_)));
    }

    #[test]
    fn test_transposed_tensor_is_not_dense() {
        let array = ArrayD::from_shape_vec(IxDyn(&[2, 3]), vec![1i32, 2, 3, 4, 5, 6]).unwrap();
        let tensor = Tensor::from_array(array.reversed_axes());
        assert!(!tensor.is_dense());
        assert!(tensor.as_slice::<i32>().is_none());

        let dense = tensor.to_standard_layout();
        assert!(dense.is_dense());
        assert_eq!(dense.shape(), &[3, 2]);
        assert_eq!(dense.as_slice::<i32>().unwrap(), &[1, 4, 2, 5, 3, 6]);
    }

    #[test]
    fn test_string_tensor() {
        let tensor = Tensor::from_shape_vec(&[2], vec!["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(tensor.kind(), ElementKind::String);
        assert_eq!(tensor.to_vec::<String>().unwrap(), vec!["a", "b"]);
    }
}
