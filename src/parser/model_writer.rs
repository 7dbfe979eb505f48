use std::fs;
use std::path::Path;

use prost::Message;

use crate::error::Result;
use crate::model::{Attribute, Dimension, Graph, Node, OnnxModel, Tensor, TensorInfo};
use crate::proto::attribute_proto::AttributeType;
use crate::proto::tensor_shape_proto::{dimension, Dimension as DimensionProto};
use crate::proto::{
    type_proto, AttributeProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto,
    StringStringEntryProto, TensorProto, TensorShapeProto, TypeProto, ValueInfoProto,
};

/// Serializes the internal representation back into ONNX protobuf
pub struct OnnxModelWriter;

impl OnnxModelWriter {
    /// Encode a model and write it to `path`, returning the number of bytes written
    pub fn write_model(model: &OnnxModel, path: &Path) -> Result<usize> {
        let bytes = Self::to_bytes(model);
        fs::write(path, &bytes)?;
        Ok(bytes.len())
    }

    pub fn to_bytes(model: &OnnxModel) -> Vec<u8> {
        Self::convert_internal_to_proto(model).encode_to_vec()
    }

    pub fn convert_internal_to_proto(model: &OnnxModel) -> ModelProto {
        // Sorted so identical models encode to identical bytes
        let mut opset_import: Vec<OperatorSetIdProto> = model
            .opset_imports
            .iter()
            .map(|(domain, version)| OperatorSetIdProto {
                domain: domain.clone(),
                version: *version,
            })
            .collect();
        opset_import.sort_by(|a, b| a.domain.cmp(&b.domain));

        let mut metadata_props: Vec<StringStringEntryProto> = model
            .metadata_props
            .iter()
            .map(|(key, value)| StringStringEntryProto {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        metadata_props.sort_by(|a, b| a.key.cmp(&b.key));

        ModelProto {
            ir_version: model.metadata.ir_version,
            producer_name: model.metadata.producer_name.clone(),
            producer_version: model.metadata.producer_version.clone(),
            domain: model.metadata.domain.clone(),
            model_version: model.metadata.model_version,
            doc_string: model.metadata.doc_string.clone(),
            graph: Some(Self::convert_graph(&model.graph)),
            opset_import,
            metadata_props,
        }
    }

    fn convert_graph(graph: &Graph) -> GraphProto {
        GraphProto {
            node: graph.nodes.iter().map(Self::convert_node).collect(),
            name: graph.name.clone(),
            initializer: graph.initializers.iter().map(Self::convert_tensor).collect(),
            doc_string: graph.doc_string.clone(),
            input: graph.inputs.iter().map(Self::convert_value_info).collect(),
            output: graph.outputs.iter().map(Self::convert_value_info).collect(),
            value_info: graph.value_info.iter().map(Self::convert_value_info).collect(),
        }
    }

    fn convert_node(node: &Node) -> NodeProto {
        let mut names: Vec<&String> = node.attributes.keys().collect();
        names.sort();

        NodeProto {
            input: node.inputs.clone(),
            output: node.outputs.clone(),
            name: node.name.clone(),
            op_type: node.op_type.clone(),
            attribute: names
                .into_iter()
                .map(|name| Self::convert_attribute(name, &node.attributes[name]))
                .collect(),
            doc_string: node.doc_string.clone(),
            domain: node.domain.clone(),
        }
    }

    fn convert_attribute(name: &str, attribute: &Attribute) -> AttributeProto {
        let mut proto = AttributeProto {
            name: name.to_string(),
            ..Default::default()
        };

        let attr_type = match attribute {
            Attribute::Float(v) => {
                proto.f = *v;
                AttributeType::Float
            }
            Attribute::Int(v) => {
                proto.i = *v;
                AttributeType::Int
            }
            Attribute::String(v) => {
                proto.s = v.clone();
                AttributeType::String
            }
            Attribute::Floats(v) => {
                proto.floats = v.clone();
                AttributeType::Floats
            }
            Attribute::Ints(v) => {
                proto.ints = v.clone();
                AttributeType::Ints
            }
            Attribute::Strings(v) => {
                proto.strings = v.clone();
                AttributeType::Strings
            }
        };
        proto.r#type = attr_type as i32;
        proto
    }

    fn convert_tensor(tensor: &Tensor) -> TensorProto {
        TensorProto {
            dims: tensor.dims.clone(),
            data_type: tensor.data_type.to_proto(),
            name: tensor.name.clone(),
            raw_data: tensor.data.clone(),
            doc_string: tensor.doc_string.clone(),
            ..Default::default()
        }
    }

    fn convert_value_info(info: &TensorInfo) -> ValueInfoProto {
        let dim = info
            .shape
            .iter()
            .map(|d| DimensionProto {
                denotation: String::new(),
                value: Some(match d {
                    Dimension::Value(v) => dimension::Value::DimValue(*v),
                    Dimension::Param(p) => dimension::Value::DimParam(p.clone()),
                }),
            })
            .collect();

        ValueInfoProto {
            name: info.name.clone(),
            r#type: Some(TypeProto {
                denotation: String::new(),
                value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                    elem_type: info.data_type.to_proto(),
                    shape: Some(TensorShapeProto { dim }),
                })),
            }),
            doc_string: info.doc_string.clone(),
        }
    }
}
