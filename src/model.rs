use std::collections::HashMap;
use std::fmt;

/// Unique identifier for a node in the graph
pub type NodeId = usize;

/// Metadata about the ONNX model
#[derive(Debug, Clone, Default)]
pub struct ModelMetadata {
    pub producer_name: String,
    pub producer_version: String,
    pub domain: String,
    pub model_version: i64,
    pub doc_string: String,
    pub graph_name: String,
    pub ir_version: i64,
}

/// A single axis of a tensor shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dimension {
    /// Fixed extent
    Value(i64),
    /// Symbolic extent resolved at inference time (e.g. `batch_size`)
    Param(String),
}

impl Dimension {
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Dimension::Param(_))
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Value(v) => write!(f, "{}", v),
            Dimension::Param(p) => write!(f, "{}", p),
        }
    }
}

/// Information about a graph input, output or intermediate value
#[derive(Debug, Clone)]
pub struct TensorInfo {
    pub name: String,
    pub shape: Vec<Dimension>,
    pub data_type: DataType,
    pub doc_string: String,
}

/// ONNX data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Undefined,
    Float,
    Double,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    String,
    Bool,
    Float16,
    BFloat16,
}

impl DataType {
    pub fn from_proto(proto_type: i32) -> Self {
        match proto_type {
            1 => DataType::Float,
            2 => DataType::Uint8,
            3 => DataType::Int8,
            4 => DataType::Uint16,
            5 => DataType::Int16,
            6 => DataType::Int32,
            7 => DataType::Int64,
            8 => DataType::String,
            9 => DataType::Bool,
            10 => DataType::Float16,
            11 => DataType::Double,
            12 => DataType::Uint32,
            13 => DataType::Uint64,
            16 => DataType::BFloat16,
            _ => DataType::Undefined,
        }
    }

    pub fn to_proto(self) -> i32 {
        match self {
            DataType::Undefined => 0,
            DataType::Float => 1,
            DataType::Uint8 => 2,
            DataType::Int8 => 3,
            DataType::Uint16 => 4,
            DataType::Int16 => 5,
            DataType::Int32 => 6,
            DataType::Int64 => 7,
            DataType::String => 8,
            DataType::Bool => 9,
            DataType::Float16 => 10,
            DataType::Double => 11,
            DataType::Uint32 => 12,
            DataType::Uint64 => 13,
            DataType::BFloat16 => 16,
        }
    }
}

/// Tensor data, stored as little-endian raw bytes
#[derive(Debug, Clone)]
pub struct Tensor {
    pub name: String,
    pub data_type: DataType,
    pub dims: Vec<i64>,
    pub data: Vec<u8>,
    pub doc_string: String,
}

impl Tensor {
    /// Build a float tensor from values laid out in row-major order
    pub fn from_f32(name: impl Into<String>, dims: Vec<i64>, values: &[f32]) -> Self {
        let mut data = Vec::with_capacity(values.len() * 4);
        for v in values {
            data.extend_from_slice(&v.to_le_bytes());
        }

        Self {
            name: name.into(),
            data_type: DataType::Float,
            dims,
            data,
            doc_string: String::new(),
        }
    }

    /// Number of elements implied by `dims`, or `None` on a negative
    /// dimension or overflow
    pub fn element_count(&self) -> Option<usize> {
        self.dims.iter().try_fold(1usize, |acc, &d| {
            usize::try_from(d).ok().and_then(|d| acc.checked_mul(d))
        })
    }
}

/// Node in the computation graph
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub op_type: String,
    pub domain: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub attributes: HashMap<String, Attribute>,
    pub doc_string: String,
}

impl Node {
    pub fn new(id: NodeId, name: impl Into<String>, op_type: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            op_type: op_type.into(),
            domain: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            attributes: HashMap::new(),
            doc_string: String::new(),
        }
    }

    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: Attribute) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }
}

/// Node attribute
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Float(f32),
    Int(i64),
    String(Vec<u8>),
    Floats(Vec<f32>),
    Ints(Vec<i64>),
    Strings(Vec<Vec<u8>>),
}

impl Attribute {
    pub fn attribute_type(&self) -> AttributeType {
        match self {
            Attribute::Float(_) => AttributeType::Float,
            Attribute::Int(_) => AttributeType::Int,
            Attribute::String(_) => AttributeType::String,
            Attribute::Floats(_) => AttributeType::Floats,
            Attribute::Ints(_) => AttributeType::Ints,
            Attribute::Strings(_) => AttributeType::Strings,
        }
    }
}

/// Graph structure containing nodes and tensors
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub name: String,
    pub nodes: Vec<Node>,
    pub inputs: Vec<TensorInfo>,
    pub outputs: Vec<TensorInfo>,
    pub initializers: Vec<Tensor>,
    pub value_info: Vec<TensorInfo>,
    pub doc_string: String,
}

/// The complete ONNX model
#[derive(Debug, Clone)]
pub struct OnnxModel {
    pub metadata: ModelMetadata,
    pub graph: Graph,
    pub opset_imports: HashMap<String, i64>,
    pub metadata_props: HashMap<String, String>,
}

/// Operator schema for validation
#[derive(Debug, Clone)]
pub struct OpSchema {
    pub name: String,
    pub domain: String,
    pub since_version: i64,
    pub inputs: Vec<FormalParameter>,
    pub outputs: Vec<FormalParameter>,
    pub attributes: HashMap<String, AttributeSchema>,
}

/// Formal parameter for operator schema
#[derive(Debug, Clone)]
pub struct FormalParameter {
    pub name: String,
    pub optional: bool,
}

impl FormalParameter {
    pub fn required(name: &str) -> Self {
        Self { name: name.to_string(), optional: false }
    }

    pub fn optional(name: &str) -> Self {
        Self { name: name.to_string(), optional: true }
    }
}

/// Attribute declaration for operator schema
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub name: String,
    pub type_: AttributeType,
    pub required: bool,
}

/// Attribute type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    Float,
    Int,
    String,
    Floats,
    Ints,
    Strings,
}
