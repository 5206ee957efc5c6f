// Type registry: the closed set of element kinds a tensor can carry and the
// host types that represent them.

use std::any::TypeId;
use std::fmt::Debug;

use half::f16;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::tensor::TensorData;

/// Element data kind of a tensor
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Float32,
    Float64,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Bool,
    Float16,
    String,
    /// Terminal error state, never produced for a valid tensor
    Undefined,
}

impl ElementKind {
    /// Convert from an ONNX `TensorProto.DataType` code.
    ///
    /// Codes outside the supported set (complex, bfloat16, float8) map to
    /// `Undefined`.
    pub fn from_onnx(code: i32) -> Self {
        match code {
            1 => ElementKind::Float32,
            2 => ElementKind::UInt8,
            3 => ElementKind::Int8,
            4 => ElementKind::UInt16,
            5 => ElementKind::Int16,
            6 => ElementKind::Int32,
            7 => ElementKind::Int64,
            8 => ElementKind::String,
            9 => ElementKind::Bool,
            10 => ElementKind::Float16,
            11 => ElementKind::Float64,
            12 => ElementKind::UInt32,
            13 => ElementKind::UInt64,
            _ => ElementKind::Undefined,
        }
    }

    /// ONNX `TensorProto.DataType` code
    pub fn to_onnx(&self) -> i32 {
        match self {
            ElementKind::Undefined => 0,
            ElementKind::Float32 => 1,
            ElementKind::UInt8 => 2,
            ElementKind::Int8 => 3,
            ElementKind::UInt16 => 4,
            ElementKind::Int16 => 5,
            ElementKind::Int32 => 6,
            ElementKind::Int64 => 7,
            ElementKind::String => 8,
            ElementKind::Bool => 9,
            ElementKind::Float16 => 10,
            ElementKind::Float64 => 11,
            ElementKind::UInt32 => 12,
            ElementKind::UInt64 => 13,
        }
    }

    /// Width of one element in bytes, `None` for kinds without a fixed width
    pub fn size_in_bytes(&self) -> Option<usize> {
        match self {
            ElementKind::Float32 => Some(4),
            ElementKind::Float64 => Some(8),
            ElementKind::Int8 => Some(1),
            ElementKind::Int16 => Some(2),
            ElementKind::Int32 => Some(4),
            ElementKind::Int64 => Some(8),
            ElementKind::UInt8 => Some(1),
            ElementKind::UInt16 => Some(2),
            ElementKind::UInt32 => Some(4),
            ElementKind::UInt64 => Some(8),
            ElementKind::Bool => Some(1),
            ElementKind::Float16 => Some(2),
            ElementKind::String | ElementKind::Undefined => None,
        }
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self, ElementKind::Undefined)
    }

    pub fn is_floating_point(&self) -> bool {
        matches!(self, ElementKind::Float16 | ElementKind::Float32 | ElementKind::Float64)
    }
}

mod private {
    pub trait Sealed {}
}

/// Host element types that map onto an [`ElementKind`].
///
/// The set is closed: it is sealed and implemented once per supported kind,
/// so dispatch over tensors is an exhaustive match rather than a lookup.
pub trait Element: Clone + Debug + PartialEq + Send + Sync + 'static + private::Sealed {
    const KIND: ElementKind;

    /// Wrap an owned array into the matching tensor storage variant
    fn wrap(array: ArrayD<Self>) -> TensorData;

    /// Borrow the array if the storage variant matches this type
    fn unwrap_ref(data: &TensorData) -> Option<&ArrayD<Self>>;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident) => {
        impl private::Sealed for $ty {}

        impl Element for $ty {
            const KIND: ElementKind = ElementKind::$variant;

            fn wrap(array: ArrayD<Self>) -> TensorData {
                TensorData::$variant(array)
            }

            fn unwrap_ref(data: &TensorData) -> Option<&ArrayD<Self>> {
                match data {
                    TensorData::$variant(array) => Some(array),
                    _ => None,
                }
            }
        }
    };
}

impl_element!(f32, Float32);
impl_element!(f64, Float64);
impl_element!(i8, Int8);
impl_element!(i16, Int16);
impl_element!(i32, Int32);
impl_element!(i64, Int64);
impl_element!(u8, UInt8);
impl_element!(u16, UInt16);
impl_element!(u32, UInt32);
impl_element!(u64, UInt64);
impl_element!(bool, Bool);
impl_element!(f16, Float16);
impl_element!(String, String);

/// Element kind for an arbitrary host type, `Undefined` when the type is not
/// one of the supported elements (complex numbers, bfloat16, structs, ...).
pub fn element_kind_of<T: 'static>() -> ElementKind {
    let id = TypeId::of::<T>();

    macro_rules! probe {
        ($($ty:ty),*) => {
            $(
                if id == TypeId::of::<$ty>() {
                    return <$ty as Element>::KIND;
                }
            )*
        };
    }

    probe!(f32, f64, i8, i16, i32, i64, u8, u16, u32, u64, bool, f16, String);
    ElementKind::Undefined
}
