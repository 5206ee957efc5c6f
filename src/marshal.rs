// Tensor marshaling between host tensors and the engine's buffer descriptors.
//
// Inputs are lent to the engine without copying: a `PinnedView` borrows the
// host buffer for exactly one engine call. Outputs are always copied out of
// engine memory into a fresh host tensor, since the engine may free or reuse
// that memory on its next call.

use std::mem;
use std::ptr;

use half::f16;
use ndarray::ArrayD;

use crate::error::{Error, Result};
use crate::tensor::{Tensor, TensorData};
use crate::types::{Element, ElementKind};

/// Raw buffer of a tensor as seen by the engine
#[derive(Debug, Clone, Copy)]
pub enum RawData<'a> {
    /// Native-endian element bytes for fixed-width kinds
    Bytes(&'a [u8]),
    /// One entry per element for string tensors
    Strings(&'a [String]),
}

/// Borrowed, non-owning view over a dense host tensor, valid for one engine call
#[derive(Debug)]
pub struct PinnedView<'a> {
    kind: ElementKind,
    shape: Vec<i64>,
    data: RawData<'a>,
}

impl<'a> PinnedView<'a> {
    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    /// Dimensions as the engine expects them
    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    pub fn data(&self) -> RawData<'a> {
        self.data
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().map(|&d| d.max(0) as usize).product()
    }

    /// Copy the viewed buffer into an owned tensor
    pub fn to_tensor(&self) -> Result<Tensor> {
        copy_to_tensor(self.kind, &self.shape, self.data)
    }
}

/// Descriptor of an engine-owned result buffer.
///
/// The borrow ties it to the engine handle, so it cannot outlive the next
/// call that could invalidate the memory.
#[derive(Debug, Clone, Copy)]
pub struct EngineValue<'a> {
    pub kind: ElementKind,
    pub shape: &'a [i64],
    pub data: RawData<'a>,
}

/// Fixed-width elements that can be moved as plain bytes.
///
/// # Safety
/// Implementors must have no padding, and `check_bytes` must reject every
/// byte pattern that is not a valid value of the type.
pub(crate) unsafe trait Plain: Element + Copy {
    fn check_bytes(_bytes: &[u8]) -> Result<()> {
        Ok(())
    }
}

unsafe impl Plain for f32 {}
unsafe impl Plain for f64 {}
unsafe impl Plain for i8 {}
unsafe impl Plain for i16 {}
unsafe impl Plain for i32 {}
unsafe impl Plain for i64 {}
unsafe impl Plain for u8 {}
unsafe impl Plain for u16 {}
unsafe impl Plain for u32 {}
unsafe impl Plain for u64 {}
unsafe impl Plain for f16 {}

unsafe impl Plain for bool {
    fn check_bytes(bytes: &[u8]) -> Result<()> {
        match bytes.iter().position(|&b| b > 1) {
            Some(index) => Err(Error::UnsupportedTensorKind(format!(
                "bool buffer holds byte {:#04x} at index {}",
                bytes[index], index
            ))),
            None => Ok(()),
        }
    }
}

fn as_bytes<T: Plain>(slice: &[T]) -> &[u8] {
    // SAFETY: `Plain` types have no padding, so every byte of the slice is
    // initialized; the returned slice borrows the same memory for the same lifetime.
    unsafe { std::slice::from_raw_parts(slice.as_ptr().cast::<u8>(), mem::size_of_val(slice)) }
}

fn dense_slice<T: Element>(array: &ArrayD<T>) -> Result<&[T]> {
    array.as_slice().ok_or_else(|| {
        Error::UnsupportedTensorKind(format!(
            "expecting a dense tensor, got a strided {} view of shape {:?}",
            T::KIND,
            array.shape()
        ))
    })
}

fn dense_bytes<T: Plain>(array: &ArrayD<T>) -> Result<&[u8]> {
    dense_slice(array).map(as_bytes)
}

/// Raw buffer of a dense tensor
pub(crate) fn raw_data(tensor: &Tensor) -> Result<RawData<'_>> {
    let data = match tensor.data() {
        TensorData::Float32(array) => RawData::Bytes(dense_bytes(array)?),
        TensorData::Float64(array) => RawData::Bytes(dense_bytes(array)?),
        TensorData::Int8(array) => RawData::Bytes(dense_bytes(array)?),
        TensorData::Int16(array) => RawData::Bytes(dense_bytes(array)?),
        TensorData::Int32(array) => RawData::Bytes(dense_bytes(array)?),
        TensorData::Int64(array) => RawData::Bytes(dense_bytes(array)?),
        TensorData::UInt8(array) => RawData::Bytes(dense_bytes(array)?),
        TensorData::UInt16(array) => RawData::Bytes(dense_bytes(array)?),
        TensorData::UInt32(array) => RawData::Bytes(dense_bytes(array)?),
        TensorData::UInt64(array) => RawData::Bytes(dense_bytes(array)?),
        TensorData::Bool(array) => RawData::Bytes(dense_bytes(array)?),
        TensorData::Float16(array) => RawData::Bytes(dense_bytes(array)?),
        TensorData::String(array) => RawData::Strings(dense_slice(array)?),
    };
    Ok(data)
}

/// Lend a host tensor to the engine without copying.
///
/// The view borrows the tensor, so the buffer stays alive and unmoved for
/// as long as the engine can read it.
pub fn to_engine_buffer(tensor: &Tensor) -> Result<PinnedView<'_>> {
    if !tensor.is_dense() {
        return Err(Error::UnsupportedTensorKind(format!(
            "expecting a dense tensor, got a strided {} tensor of shape {:?}",
            tensor.kind(),
            tensor.shape()
        )));
    }

    let shape = tensor.shape().iter().map(|&d| d as i64).collect();
    Ok(PinnedView {
        kind: tensor.kind(),
        shape,
        data: raw_data(tensor)?,
    })
}

/// Copy an engine result into a freshly allocated host tensor
pub fn from_engine_value(value: &EngineValue<'_>) -> Result<Tensor> {
    copy_to_tensor(value.kind, value.shape, value.data)
}

fn copy_to_tensor(kind: ElementKind, shape: &[i64], data: RawData<'_>) -> Result<Tensor> {
    if kind == ElementKind::Undefined {
        return Err(Error::UndefinedElementKind(format!(
            "undefined data type detected in a value of shape {:?}",
            shape
        )));
    }

    let dims = shape
        .iter()
        .map(|&d| {
            usize::try_from(d).map_err(|_| {
                Error::ShapeMismatch(format!("negative dimension {} in shape {:?}", d, shape))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let len = dims
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| Error::ShapeMismatch(format!("shape {:?} overflows", shape)))?;

    match kind {
        ElementKind::Float32 => copy_plain::<f32>(&dims, len, data),
        ElementKind::Float64 => copy_plain::<f64>(&dims, len, data),
        ElementKind::Int8 => copy_plain::<i8>(&dims, len, data),
        ElementKind::Int16 => copy_plain::<i16>(&dims, len, data),
        ElementKind::Int32 => copy_plain::<i32>(&dims, len, data),
        ElementKind::Int64 => copy_plain::<i64>(&dims, len, data),
        ElementKind::UInt8 => copy_plain::<u8>(&dims, len, data),
        ElementKind::UInt16 => copy_plain::<u16>(&dims, len, data),
        ElementKind::UInt32 => copy_plain::<u32>(&dims, len, data),
        ElementKind::UInt64 => copy_plain::<u64>(&dims, len, data),
        ElementKind::Bool => copy_plain::<bool>(&dims, len, data),
        ElementKind::Float16 => copy_plain::<f16>(&dims, len, data),
        ElementKind::String => copy_strings(&dims, len, data),
        ElementKind::Undefined => unreachable!("undefined kind rejected above"),
    }
}

fn copy_plain<T: Plain>(dims: &[usize], len: usize, data: RawData<'_>) -> Result<Tensor> {
    let bytes = match data {
        RawData::Bytes(bytes) => bytes,
        RawData::Strings(_) => {
            return Err(Error::UnsupportedTensorKind(format!(
                "{} value carries a string buffer",
                T::KIND
            )))
        }
    };

    let expected = len
        .checked_mul(mem::size_of::<T>())
        .ok_or_else(|| Error::ShapeMismatch(format!("shape {:?} overflows", dims)))?;
    if bytes.len() != expected {
        return Err(Error::ShapeMismatch(format!(
            "{} value of shape {:?} needs {} bytes, buffer holds {}",
            T::KIND,
            dims,
            expected,
            bytes.len()
        )));
    }
    T::check_bytes(bytes)?;

    let mut out: Vec<T> = Vec::with_capacity(len);
    // SAFETY: `out` has room for `len` elements and `bytes` holds exactly
    // `len * size_of::<T>()` validated bytes. The copy is bytewise, so the
    // alignment of the source buffer does not matter.
    unsafe {
        ptr::copy_nonoverlapping(bytes.as_ptr(), out.as_mut_ptr().cast::<u8>(), expected);
        out.set_len(len);
    }

    Tensor::from_shape_vec(dims, out)
}

fn copy_strings(dims: &[usize], len: usize, data: RawData<'_>) -> Result<Tensor> {
    match data {
        RawData::Strings(strings) if strings.len() == len => {
            Tensor::from_shape_vec(dims, strings.to_vec())
        }
        RawData::Strings(strings) => Err(Error::ShapeMismatch(format!(
            "string value of shape {:?} needs {} entries, buffer holds {}",
            dims,
            len,
            strings.len()
        ))),
        RawData::Bytes(_) => Err(Error::UnsupportedTensorKind(
            "string value carries a numeric buffer".to_string(),
        )),
    }
}
