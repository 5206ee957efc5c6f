use anyhow::Result;
use half::f16;
use ndarray::{ArrayD, IxDyn};
use num_complex::Complex;
use rand::prelude::*;

use onnx_session::{
    element_kind_of, from_engine_value, to_engine_buffer, ElementKind, EngineValue, Error, RawData, Tensor,
};

#[test]
fn test_type_registry() {
    assert_eq!(element_kind_of::<f32>(), ElementKind::Float32);
    assert_eq!(element_kind_of::<u64>(), ElementKind::UInt64);
    assert_eq!(element_kind_of::<f16>(), ElementKind::Float16);
    assert_eq!(element_kind_of::<String>(), ElementKind::String);
    assert_eq!(element_kind_of::<Complex<f32>>(), ElementKind::Undefined);
    assert_eq!(element_kind_of::<&str>(), ElementKind::Undefined);
}

#[test]
fn test_random_buffers_survive_the_boundary() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..8 {
        let shape: Vec<usize> = (0..rng.gen_range(0..4)).map(|_| rng.gen_range(1..5)).collect();
        let len: usize = shape.iter().product();

        let floats = Tensor::from_shape_vec(&shape, (0..len).map(|_| rng.gen::<f64>()).collect())?;
        let ints = Tensor::from_shape_vec(&shape, (0..len).map(|_| rng.gen::<i32>()).collect())?;
        for tensor in [floats, ints] {
            let view = to_engine_buffer(&tensor)?;
            let copy = view.to_tensor()?;
            assert_eq!(copy, tensor);
        }
    }
    Ok(())
}

#[test]
fn test_engine_value_is_validated() {
    let bytes = 7.5f32.to_ne_bytes();
    let shape = [1i64];
    let ok = EngineValue {
        kind: ElementKind::Float32,
        shape: &shape,
        data: RawData::Bytes(&bytes),
    };
    assert_eq!(from_engine_value(&ok).unwrap().to_vec::<f32>().unwrap(), vec![7.5]);

    let wide = [2i64];
    let short = EngineValue { shape: &wide, ..ok };
    assert!(matches!(from_engine_value(&short), Err(Error::ShapeMismatch(_))));

    let undefined = EngineValue {
        kind: ElementKind::Undefined,
        ..ok
    };
    assert!(matches!(from_engine_value(&undefined), Err(Error::UndefinedElementKind(_))));
}

#[test]
fn test_strided_input_needs_standard_layout() -> Result<()> {
    let array = ArrayD::from_shape_vec(IxDyn(&[2, 3]), (0..6).collect::<Vec<i64>>())?;
    let transposed = Tensor::from_array(array.reversed_axes());
    assert!(matches!(to_engine_buffer(&transposed), Err(Error::UnsupportedTensorKind(_))));

    let dense = transposed.to_standard_layout();
    let view = to_engine_buffer(&dense)?;
    assert_eq!(view.shape(), &[3, 2]);
    assert_eq!(view.to_tensor()?.to_vec::<i64>().unwrap(), vec![0, 3, 1, 4, 2, 5]);
    Ok(())
}
