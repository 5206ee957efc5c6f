// Model fixtures shared by the integration tests. Models are built from the
// protobuf messages and written into a temporary directory.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use prost::Message;

use onnx_session::proto::attribute_proto::AttributeType;
use onnx_session::proto::tensor_shape_proto::{dimension, Dimension};
use onnx_session::proto::{
    type_proto, AttributeProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto, TensorProto,
    TensorShapeProto, TypeProto, ValueInfoProto,
};
use onnx_session::ElementKind;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Value declaration; `None` leaves the shape unconstrained
pub fn value_info(name: &str, kind: ElementKind, dims: Option<&[i64]>) -> ValueInfoProto {
    ValueInfoProto {
        name: name.to_string(),
        r#type: Some(TypeProto {
            value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                elem_type: kind.to_onnx(),
                shape: dims.map(|dims| TensorShapeProto {
                    dim: dims
                        .iter()
                        .map(|&d| Dimension {
                            value: Some(if d < 0 {
                                dimension::Value::DimParam("N".to_string())
                            } else {
                                dimension::Value::DimValue(d)
                            }),
                            ..Default::default()
                        })
                        .collect(),
                }),
            })),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn float_initializer(name: &str, dims: &[i64], values: &[f32]) -> TensorProto {
    TensorProto {
        name: name.to_string(),
        dims: dims.to_vec(),
        data_type: ElementKind::Float32.to_onnx(),
        float_data: values.to_vec(),
        ..Default::default()
    }
}

pub fn node(name: &str, op_type: &str, inputs: &[&str], outputs: &[&str]) -> NodeProto {
    NodeProto {
        name: name.to_string(),
        op_type: op_type.to_string(),
        input: inputs.iter().map(|s| s.to_string()).collect(),
        output: outputs.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

pub fn int_attribute(name: &str, value: i64) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        r#type: AttributeType::Int as i32,
        i: value,
        ..Default::default()
    }
}

pub fn model(graph: GraphProto) -> ModelProto {
    ModelProto {
        ir_version: 8,
        producer_name: "fixtures".to_string(),
        opset_import: vec![OperatorSetIdProto {
            domain: String::new(),
            version: 13,
        }],
        graph: Some(graph),
        ..Default::default()
    }
}

pub fn write_model(dir: &Path, file_name: &str, model: &ModelProto) -> PathBuf {
    let path = dir.join(file_name);
    fs::write(&path, model.encode_to_vec()).unwrap();
    path
}

/// One Identity node per kind: `x{i}` -> `y{i}`
pub fn identity_model(kinds: &[ElementKind]) -> ModelProto {
    let mut graph = GraphProto {
        name: "identity".to_string(),
        ..Default::default()
    };
    for (i, &kind) in kinds.iter().enumerate() {
        let (x, y) = (format!("x{}", i), format!("y{}", i));
        graph.node.push(node(&format!("identity_{}", i), "Identity", &[&x], &[&y]));
        graph.input.push(value_info(&x, kind, None));
        graph.output.push(value_info(&y, kind, None));
    }
    model(graph)
}

/// Weights of a 3-4-2 perceptron
pub struct MlpWeights {
    pub w1: Vec<f32>,
    pub b1: Vec<f32>,
    pub w2: Vec<f32>,
    pub b2: Vec<f32>,
}

impl MlpWeights {
    pub fn fixed() -> Self {
        Self {
            w1: vec![0.5, -1.0, 0.25, 1.0, -0.5, 0.75, 1.5, -0.25, 1.0, 0.0, -1.0, 0.5],
            b1: vec![0.1, -0.2, 0.0, 0.3],
            w2: vec![1.0, -1.0, 0.5, 0.5, -0.75, 1.25, 2.0, 0.0],
            b2: vec![0.05, -0.05],
        }
    }

    /// Reference forward pass: softmax(relu(x W1 + b1) W2 + b2)
    pub fn forward(&self, x: &[f32], batch: usize) -> Vec<f32> {
        let mut out = Vec::with_capacity(batch * 2);
        for row in x.chunks(3).take(batch) {
            let hidden: Vec<f32> = (0..4)
                .map(|j| {
                    let sum: f32 = (0..3).map(|k| row[k] * self.w1[k * 4 + j]).sum::<f32>() + self.b1[j];
                    sum.max(0.0)
                })
                .collect();
            let logits: Vec<f32> = (0..2)
                .map(|j| (0..4).map(|k| hidden[k] * self.w2[k * 2 + j]).sum::<f32>() + self.b2[j])
                .collect();
            let max = logits[0].max(logits[1]);
            let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
            let total: f32 = exps.iter().sum();
            out.extend(exps.iter().map(|e| e / total));
        }
        out
    }
}

/// `x [N,3] -> Gemm -> Relu -> Gemm -> Softmax -> probs [N,2]`
pub fn mlp_model(weights: &MlpWeights) -> ModelProto {
    let mut softmax = node("softmax", "Softmax", &["logits"], &["probs"]);
    softmax.attribute.push(int_attribute("axis", 1));

    model(GraphProto {
        name: "mlp".to_string(),
        node: vec![
            node("fc1", "Gemm", &["x", "w1", "b1"], &["h"]),
            node("relu", "Relu", &["h"], &["a"]),
            node("fc2", "Gemm", &["a", "w2", "b2"], &["logits"]),
            softmax,
        ],
        initializer: vec![
            float_initializer("w1", &[3, 4], &weights.w1),
            float_initializer("b1", &[4], &weights.b1),
            float_initializer("w2", &[4, 2], &weights.w2),
            float_initializer("b2", &[2], &weights.b2),
        ],
        input: vec![value_info("x", ElementKind::Float32, Some(&[-1, 3]))],
        output: vec![value_info("probs", ElementKind::Float32, Some(&[-1, 2]))],
        ..Default::default()
    })
}
