use std::collections::HashMap;
use std::fs;
use std::path::Path;

use prost::Message;

use crate::error::{Error, Result};
use crate::model::{Attribute, DataType, Dimension, Graph, ModelMetadata, Node, OnnxModel, Tensor, TensorInfo};
use crate::proto::attribute_proto::AttributeType;
use crate::proto::tensor_shape_proto::dimension;
use crate::proto::{
    type_proto, AttributeProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto, TensorProto,
    ValueInfoProto,
};

/// ONNX model loader responsible for parsing and loading ONNX models
pub struct OnnxModelLoader;

impl OnnxModelLoader {
    /// Load an ONNX model from a file path
    pub fn load_model(path: &Path) -> Result<OnnxModel> {
        let buffer = fs::read(path).map_err(|e| {
            Error::ModelLoadError(path.to_path_buf(), format!("Failed to read file: {}", e))
        })?;

        Self::load_model_from_bytes(&buffer)
    }

    /// Load an ONNX model from bytes
    pub fn load_model_from_bytes(data: &[u8]) -> Result<OnnxModel> {
        let model_proto = Self::deserialize_model_proto(data)?;
        Self::convert_proto_to_internal(model_proto)
    }

    /// Deserialize protobuf bytes into a ModelProto
    pub fn deserialize_model_proto(bytes: &[u8]) -> Result<ModelProto> {
        ModelProto::decode(bytes).map_err(Error::ProtobufError)
    }

    /// Convert protobuf model to internal representation
    pub fn convert_proto_to_internal(proto: ModelProto) -> Result<OnnxModel> {
        let opset_imports = Self::handle_opset_imports(&proto.opset_import);
        let metadata = Self::extract_model_metadata(&proto);
        let metadata_props = proto
            .metadata_props
            .iter()
            .map(|entry| (entry.key.clone(), entry.value.clone()))
            .collect();

        let graph_proto = proto
            .graph
            .ok_or_else(|| Error::MissingField("Model is missing graph".to_string()))?;
        let graph = Self::convert_graph_proto(graph_proto)?;

        Ok(OnnxModel {
            metadata,
            graph,
            opset_imports,
            metadata_props,
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

    /// Process opset imports. Later imports of the same domain win.
    pub fn handle_opset_imports(imports: &[OperatorSetIdProto]) -> HashMap<String, i64> {
        imports
            .iter()
            .map(|import| (import.domain.clone(), import.version))
            .collect()
    }

    /// Extract input tensor information from model
    pub fn get_input_info(model: &OnnxModel) -> Vec<TensorInfo> {
        model.graph.inputs.clone()
    }

    /// Extract output tensor information from model
    pub fn get_output_info(model: &OnnxModel) -> Vec<TensorInfo> {
        model.graph.outputs.clone()
    }

    fn convert_graph_proto(graph_proto: GraphProto) -> Result<Graph> {
        let initializers = graph_proto
            .initializer
            .iter()
            .map(Self::convert_tensor_proto)
            .collect::<Result<Vec<_>>>()?;

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

        let value_info = graph_proto
            .value_info
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
            value_info,
            doc_string: graph_proto.doc_string,
        })
    }

    fn convert_node_proto(node_proto: &NodeProto, id: usize) -> Result<Node> {
        let mut attributes = HashMap::new();

        for attr in &node_proto.attribute {
            let value = Self::convert_attribute_proto(attr)?;
            attributes.insert(attr.name.clone(), value);
        }

        Ok(Node {
            id,
            name: node_proto.name.clone(),
            op_type: node_proto.op_type.clone(),
            domain: node_proto.domain.clone(),
            inputs: node_proto.input.clone(),
            outputs: node_proto.output.clone(),
            attributes,
            doc_string: node_proto.doc_string.clone(),
        })
    }

    fn convert_tensor_proto(tensor_proto: &TensorProto) -> Result<Tensor> {
        let data_type = DataType::from_proto(tensor_proto.data_type);

        let data = if !tensor_proto.raw_data.is_empty() {
            tensor_proto.raw_data.clone()
        } else {
            match data_type {
                DataType::Float => tensor_proto
                    .float_data
                    .iter()
                    .flat_map(|v| v.to_le_bytes())
                    .collect(),
                DataType::Int32 => tensor_proto
                    .int32_data
                    .iter()
                    .flat_map(|v| v.to_le_bytes())
                    .collect(),
                DataType::Int64 => tensor_proto
                    .int64_data
                    .iter()
                    .flat_map(|v| v.to_le_bytes())
                    .collect(),
                DataType::Undefined => {
                    return Err(Error::InvalidModel(format!(
                        "Tensor {} has undefined data type",
                        tensor_proto.name
                    )))
                }
                _ => Vec::new(),
            }
        };

        Ok(Tensor {
            name: tensor_proto.name.clone(),
            data_type,
            dims: tensor_proto.dims.clone(),
            data,
            doc_string: tensor_proto.doc_string.clone(),
        })
    }

    fn convert_value_info_proto(value_info: &ValueInfoProto) -> Result<TensorInfo> {
        let name = value_info.name.clone();

        let type_proto = value_info
            .r#type
            .as_ref()
            .ok_or_else(|| Error::MissingField(format!("Missing type for value info: {}", name)))?;

        let tensor_type = match &type_proto.value {
            Some(type_proto::Value::TensorType(tensor)) => tensor,
            None => {
                return Err(Error::MissingField(format!(
                    "Missing tensor type for value info: {}",
                    name
                )))
            }
        };

        let shape = match &tensor_type.shape {
            Some(shape) => shape
                .dim
                .iter()
                .map(|dim| match &dim.value {
                    Some(dimension::Value::DimValue(v)) => Ok(Dimension::Value(*v)),
                    Some(dimension::Value::DimParam(p)) => Ok(Dimension::Param(p.clone())),
                    None => Err(Error::MissingField(format!(
                        "Missing dimension value in {}",
                        name
                    ))),
                })
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        Ok(TensorInfo {
            name,
            shape,
            data_type: DataType::from_proto(tensor_type.elem_type),
            doc_string: value_info.doc_string.clone(),
        })
    }

    fn convert_attribute_proto(attr: &AttributeProto) -> Result<Attribute> {
        match AttributeType::from_i32(attr.r#type) {
            Some(AttributeType::Float) => Ok(Attribute::Float(attr.f)),
            Some(AttributeType::Int) => Ok(Attribute::Int(attr.i)),
            Some(AttributeType::String) => Ok(Attribute::String(attr.s.clone())),
            Some(AttributeType::Floats) => Ok(Attribute::Floats(attr.floats.clone())),
            Some(AttributeType::Ints) => Ok(Attribute::Ints(attr.ints.clone())),
            Some(AttributeType::Strings) => Ok(Attribute::Strings(attr.strings.clone())),
            Some(AttributeType::Undefined) | None => Err(Error::InvalidModel(format!(
                "Undefined attribute type for {}",
                attr.name
            ))),
            Some(other) => Err(Error::UnsupportedFeature(format!(
                "{:?} attributes not supported ({})",
                other, attr.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_graph_is_rejected() {
        let proto = ModelProto {
            ir_version: 7,
            ..Default::default()
        };

        let result = OnnxModelLoader::convert_proto_to_internal(proto);
        assert!(matches!(result, Err(Error::MissingField(_))));
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        let result = OnnxModelLoader::load_model_from_bytes(&[0xff, 0xff, 0xff, 0xff]);
        assert!(result.is_err());
    }

    #[test]
    fn test_opset_imports_keep_last_version() {
        let imports = vec![
            OperatorSetIdProto { domain: String::new(), version: 11 },
            OperatorSetIdProto { domain: String::new(), version: 12 },
            OperatorSetIdProto { domain: "ai.onnx.ml".to_string(), version: 2 },
        ];

        let map = OnnxModelLoader::handle_opset_imports(&imports);
        assert_eq!(map.get(""), Some(&12));
        assert_eq!(map.get("ai.onnx.ml"), Some(&2));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let result = OnnxModelLoader::load_model(Path::new("/nonexistent/model.onnx"));
        match result {
            Err(Error::ModelLoadError(path, _)) => {
                assert_eq!(path, Path::new("/nonexistent/model.onnx"));
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
