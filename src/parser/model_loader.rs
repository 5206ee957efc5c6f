use std::collections::HashMap;
use std::fmt::Display;
use std::fs;
use std::path::Path;

use half::f16;
use prost::Message;

use crate::error::{Error, Result};
use crate::model::{Attribute, Graph, ModelMetadata, Node, OnnxModel, TensorInfo};
use crate::proto::attribute_proto::AttributeType;
use crate::proto::tensor_shape_proto::dimension;
use crate::proto::type_proto;
use crate::proto::{AttributeProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto, TensorProto, ValueInfoProto};
use crate::tensor::Tensor;
use crate::types::{Element, ElementKind};

/// Decode little-endian fixed-width values
macro_rules! decode_le {
    ($raw:expr, $ty:ty) => {{
        const WIDTH: usize = std::mem::size_of::<$ty>();
        $raw.chunks_exact(WIDTH)
            .map(|chunk| {
                let mut bytes = [0u8; WIDTH];
                bytes.copy_from_slice(chunk);
                <$ty>::from_le_bytes(bytes)
            })
            .collect::<Vec<$ty>>()
    }};
}

/// ONNX model loader responsible for parsing and loading ONNX models
pub struct OnnxModelLoader;

impl OnnxModelLoader {
    /// Load an ONNX model from a file path
    pub fn load_model(path: &Path) -> Result<OnnxModel> {
        let buffer = fs::read(path)?;
        Self::load_model_from_bytes(&buffer)
    }

    /// Load an ONNX model from bytes
    pub fn load_model_from_bytes(data: &[u8]) -> Result<OnnxModel> {
        let model_proto = ModelProto::decode(data)?;
        Self::convert_proto_to_internal(model_proto)
    }

    /// Convert protobuf model to internal representation
    pub fn convert_proto_to_internal(proto: ModelProto) -> Result<OnnxModel> {
        let opset_imports = Self::handle_opset_imports(&proto.opset_import);
        let metadata = Self::extract_model_metadata(&proto);

        let graph_proto = proto
            .graph
            .ok_or_else(|| Error::InvalidModel("model has no graph".to_string()))?;
        let graph = Self::convert_graph_proto(graph_proto)?;

        Ok(OnnxModel {
            metadata,
            graph,
            opset_imports,
        })
    }

    /// Extract model metadata from protobuf
    pub fn extract_model_metadata(proto: &ModelProto) -> ModelMetadata {
        ModelMetadata {
            producer_name: proto.producer_name.clone(),
            producer_version: proto.producer_version.clone(),
            domain: proto.domain.clone(),
            model_version: proto.model_version,
            doc_string: proto.doc_string.clone(),
            graph_name: proto.graph.as_ref().map(|g| g.name.clone()).unwrap_or_default(),
            ir_version: proto.ir_version,
        }
    }

    /// Opset version per domain; the default domain is at least version 1
    pub fn handle_opset_imports(imports: &[OperatorSetIdProto]) -> HashMap<String, i64> {
        let mut opset_map = HashMap::new();
        opset_map.insert(String::new(), 1);

        for import in imports {
            let domain = if import.domain == "ai.onnx" { String::new() } else { import.domain.clone() };
            opset_map.insert(domain, import.version.max(1));
        }
        opset_map
    }

    fn convert_graph_proto(graph_proto: GraphProto) -> Result<Graph> {
        let initializers = graph_proto
            .initializer
            .iter()
            .map(|init| Ok((init.name.clone(), Self::convert_tensor_proto(init)?)))
            .collect::<Result<HashMap<_, _>>>()?;

        let inputs = graph_proto
            .input
            .iter()
            .map(Self::convert_value_info_proto)
            .collect::<Result<Vec<_>>>()?;

        let outputs = graph_proto
            .output
            .iter()
            .map(Self::convert_value_info_proto)
            .collect::<Result<Vec<_>>>()?;

        let nodes = graph_proto
            .node
            .iter()
            .enumerate()
            .map(|(id, node)| Self::convert_node_proto(node, id))
            .collect::<Result<Vec<_>>>()?;

        Ok(Graph {
            name: graph_proto.name,
            nodes,
            inputs,
            outputs,
            initializers,
            doc_string: graph_proto.doc_string,
        })
    }

    fn convert_node_proto(node_proto: &NodeProto, id: usize) -> Result<Node> {
        let attributes = node_proto
            .attribute
            .iter()
            .map(|attr| Ok((attr.name.clone(), Self::convert_attribute_proto(attr)?)))
            .collect::<Result<HashMap<_, _>>>()?;

        // Unnamed nodes get a positional name so profiler events stay distinct
        let name = if node_proto.name.is_empty() {
            format!("{}_{}", node_proto.op_type, id)
        } else {
            node_proto.name.clone()
        };

        Ok(Node {
            id,
            name,
            op_type: node_proto.op_type.clone(),
            domain: node_proto.domain.clone(),
            inputs: node_proto.input.clone(),
            outputs: node_proto.output.clone(),
            attributes,
            doc_string: node_proto.doc_string.clone(),
        })
    }

    /// Convert a TensorProto into a host tensor
    pub fn convert_tensor_proto(proto: &TensorProto) -> Result<Tensor> {
        let kind = ElementKind::from_onnx(proto.data_type);
        let dims = proto
            .dims
            .iter()
            .map(|&d| {
                usize::try_from(d).map_err(|_| {
                    Error::InvalidModel(format!("tensor {} has negative dimension {}", proto.name, d))
                })
            })
            .collect::<Result<Vec<usize>>>()?;
        let too_large =
            || Error::InvalidModel(format!("tensor {} has shape {:?} too large to address", proto.name, dims));
        let len = dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(too_large)?;

        let raw = proto.raw_data.as_slice();
        let has_raw = !raw.is_empty();
        if has_raw {
            let width = kind.size_in_bytes().ok_or_else(|| {
                Error::InvalidModel(format!("tensor {} of kind {} cannot use raw_data", proto.name, kind))
            })?;
            let expected = len.checked_mul(width).ok_or_else(too_large)?;
            if raw.len() != expected {
                return Err(Error::InvalidModel(format!(
                    "tensor {} has {} raw bytes, shape {:?} needs {}",
                    proto.name,
                    raw.len(),
                    dims,
                    expected
                )));
            }
        }

        let tensor = match kind {
            ElementKind::Float32 => {
                build(&proto.name, &dims, if has_raw { decode_le!(raw, f32) } else { proto.float_data.clone() })
            }
            ElementKind::Float64 => {
                build(&proto.name, &dims, if has_raw { decode_le!(raw, f64) } else { proto.double_data.clone() })
            }
            ElementKind::Int8 => {
                build(&proto.name, &dims, if has_raw { decode_le!(raw, i8) } else { narrow(&proto.int32_data)? })
            }
            ElementKind::Int16 => {
                build(&proto.name, &dims, if has_raw { decode_le!(raw, i16) } else { narrow(&proto.int32_data)? })
            }
            ElementKind::Int32 => {
                build(&proto.name, &dims, if has_raw { decode_le!(raw, i32) } else { proto.int32_data.clone() })
            }
            ElementKind::Int64 => {
                build(&proto.name, &dims, if has_raw { decode_le!(raw, i64) } else { proto.int64_data.clone() })
            }
            ElementKind::UInt8 => {
                build(&proto.name, &dims, if has_raw { raw.to_vec() } else { narrow(&proto.int32_data)? })
            }
            ElementKind::UInt16 => {
                build(&proto.name, &dims, if has_raw { decode_le!(raw, u16) } else { narrow(&proto.int32_data)? })
            }
            ElementKind::UInt32 => {
                build(&proto.name, &dims, if has_raw { decode_le!(raw, u32) } else { narrow(&proto.uint64_data)? })
            }
            ElementKind::UInt64 => {
                build(&proto.name, &dims, if has_raw { decode_le!(raw, u64) } else { proto.uint64_data.clone() })
            }
            ElementKind::Bool => {
                let values = if has_raw {
                    raw.iter().map(|&b| b != 0).collect()
                } else {
                    proto.int32_data.iter().map(|&v| v != 0).collect()
                };
                build(&proto.name, &dims, values)
            }
            ElementKind::Float16 => {
                let bits: Vec<u16> = if has_raw { decode_le!(raw, u16) } else { narrow(&proto.int32_data)? };
                build(&proto.name, &dims, bits.into_iter().map(f16::from_bits).collect())
            }
            ElementKind::String => {
                let values = proto
                    .string_data
                    .iter()
                    .map(|bytes| {
                        String::from_utf8(bytes.clone()).map_err(|_| {
                            Error::InvalidModel(format!("tensor {} holds a non UTF-8 string", proto.name))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                build(&proto.name, &dims, values)
            }
            ElementKind::Undefined => Err(Error::InvalidModel(format!(
                "tensor {} has unsupported data type {}",
                proto.name, proto.data_type
            ))),
        }?;

        Ok(tensor)
    }

    fn convert_value_info_proto(value_info: &ValueInfoProto) -> Result<TensorInfo> {
        let name = value_info.name.clone();

        let tensor_type = match value_info.r#type.as_ref().and_then(|t| t.value.as_ref()) {
            Some(type_proto::Value::TensorType(tensor)) => tensor,
            None => return Err(Error::InvalidModel(format!("value {} has no tensor type", name))),
        };

        let shape = tensor_type
            .shape
            .as_ref()
            .map(|shape| {
                shape
                    .dim
                    .iter()
                    .map(|dim| match &dim.value {
                        Some(dimension::Value::DimValue(value)) => *value,
                        Some(dimension::Value::DimParam(_)) | None => -1,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(TensorInfo {
            name,
            shape,
            kind: ElementKind::from_onnx(tensor_type.elem_type),
            doc_string: value_info.doc_string.clone(),
        })
    }

    fn convert_attribute_proto(attr: &AttributeProto) -> Result<Attribute> {
        let text = |bytes: &[u8]| {
            String::from_utf8(bytes.to_vec())
                .map_err(|_| Error::InvalidModel(format!("attribute {} holds a non UTF-8 string", attr.name)))
        };

        match attr.r#type() {
            AttributeType::Float => Ok(Attribute::Float(attr.f)),
            AttributeType::Int => Ok(Attribute::Int(attr.i)),
            AttributeType::String => Ok(Attribute::String(text(&attr.s)?)),
            AttributeType::Tensor => {
                let tensor = attr.t.as_ref().ok_or_else(|| {
                    Error::InvalidModel(format!("attribute {} is missing its tensor", attr.name))
                })?;
                Ok(Attribute::Tensor(Self::convert_tensor_proto(tensor)?))
            }
            AttributeType::Floats => Ok(Attribute::Floats(attr.floats.clone())),
            AttributeType::Ints => Ok(Attribute::Ints(attr.ints.clone())),
            AttributeType::Strings => Ok(Attribute::Strings(
                attr.strings.iter().map(|s| text(s)).collect::<Result<Vec<_>>>()?,
            )),
            AttributeType::Graph | AttributeType::Graphs | AttributeType::Tensors => Err(Error::InvalidModel(
                format!("attribute {} has an unsupported type {:?}", attr.name, attr.r#type()),
            )),
            AttributeType::Undefined => Err(Error::InvalidModel(format!(
                "attribute {} has an undefined type",
                attr.name
            ))),
        }
    }
}

fn build<T: Element>(name: &str, dims: &[usize], values: Vec<T>) -> Result<Tensor> {
    Tensor::from_shape_vec(dims, values)
        .map_err(|e| Error::InvalidModel(format!("tensor {}: {}", name, e)))
}

/// Narrow values stored in a wider typed field (int32_data, uint64_data)
fn narrow<S, T>(values: &[S]) -> Result<Vec<T>>
where
    S: Copy + Display,
    T: TryFrom<S>,
{
    values
        .iter()
        .map(|&v| {
            T::try_from(v).map_err(|_| Error::InvalidModel(format!("value {} out of range for its data type", v)))
        })
        .collect()
}
