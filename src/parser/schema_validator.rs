use std::collections::{HashMap, HashSet};

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;

use crate::error::{Error, Result};
use crate::model::{AttributeSchema, AttributeType, DataType, FormalParameter, Graph, Node, OnnxModel, OpSchema};

/// Structural checker for ONNX models.
///
/// Only operators with a registered schema are accepted, so models using
/// operators outside that set fail even when a runtime could execute them.
pub struct SchemaValidator {
    // domain -> op_type -> schemas ordered by since_version
    schemas: HashMap<String, HashMap<String, Vec<OpSchema>>>,

    // Minimum supported IR version
    min_ir_version: i64,

    // Maximum supported IR version
    max_ir_version: i64,
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaValidator {
    /// Create a new schema validator with defaults
    pub fn new() -> Self {
        let mut validator = Self {
            schemas: HashMap::new(),
            min_ir_version: 3, // ONNX IR version 3
            max_ir_version: 8, // ONNX IR version 8
        };

        validator.register_default_schemas();
        validator
    }

    fn register_default_schemas(&mut self) {
        use FormalParameter as P;

        self.register_schema(Self::schema("Relu", 1, vec![P::required("X")], vec![P::required("Y")], vec![]));
        self.register_schema(Self::schema("Sigmoid", 1, vec![P::required("X")], vec![P::required("Y")], vec![]));
        self.register_schema(Self::schema("Tanh", 1, vec![P::required("X")], vec![P::required("Y")], vec![]));
        self.register_schema(Self::schema("Identity", 1, vec![P::required("input")], vec![P::required("output")], vec![]));
        self.register_schema(Self::schema(
            "Softmax",
            1,
            vec![P::required("input")],
            vec![P::required("output")],
            vec![Self::attr("axis", AttributeType::Int)],
        ));
        self.register_schema(Self::schema(
            "Flatten",
            1,
            vec![P::required("input")],
            vec![P::required("output")],
            vec![Self::attr("axis", AttributeType::Int)],
        ));
        self.register_schema(Self::schema(
            "MatMul",
            1,
            vec![P::required("A"), P::required("B")],
            vec![P::required("Y")],
            vec![],
        ));
        self.register_schema(Self::schema(
            "Add",
            1,
            vec![P::required("A"), P::required("B")],
            vec![P::required("C")],
            vec![],
        ));
        self.register_schema(Self::schema(
            "Gemm",
            1,
            vec![P::required("A"), P::required("B"), P::optional("C")],
            vec![P::required("Y")],
            vec![
                Self::attr("alpha", AttributeType::Float),
                Self::attr("beta", AttributeType::Float),
                Self::attr("transA", AttributeType::Int),
                Self::attr("transB", AttributeType::Int),
            ],
        ));
        self.register_schema(Self::schema(
            "Conv",
            1,
            vec![P::required("X"), P::required("W"), P::optional("B")],
            vec![P::required("Y")],
            vec![
                Self::attr("kernel_shape", AttributeType::Ints),
                Self::attr("strides", AttributeType::Ints),
                Self::attr("pads", AttributeType::Ints),
                Self::attr("dilations", AttributeType::Ints),
                Self::attr("group", AttributeType::Int),
            ],
        ));
        self.register_schema(Self::schema(
            "Dropout",
            12,
            vec![P::required("data"), P::optional("ratio"), P::optional("training_mode")],
            vec![P::required("output"), P::optional("mask")],
            vec![Self::attr("seed", AttributeType::Int)],
        ));
    }

    fn schema(
        name: &str,
        since_version: i64,
        inputs: Vec<FormalParameter>,
        outputs: Vec<FormalParameter>,
        attributes: Vec<AttributeSchema>,
    ) -> OpSchema {
        OpSchema {
            name: name.to_string(),
            domain: String::new(),
            since_version,
            inputs,
            outputs,
            attributes: attributes.into_iter().map(|a| (a.name.clone(), a)).collect(),
        }
    }

    fn attr(name: &str, type_: AttributeType) -> AttributeSchema {
        AttributeSchema {
            name: name.to_string(),
            type_,
            required: false,
        }
    }

    /// Register a schema in the registry
    pub fn register_schema(&mut self, schema: OpSchema) {
        let versions = self
            .schemas
            .entry(schema.domain.clone())
            .or_default()
            .entry(schema.name.clone())
            .or_default();

        versions.push(schema);
        versions.sort_by_key(|s| s.since_version);
    }

    /// Validate the ONNX model
    pub fn validate_model(&self, model: &OnnxModel) -> Result<()> {
        self.check_version_compatibility(model)?;
        self.validate_graph(model)?;
        self.validate_tensor_shapes(&model.graph)?;
        Ok(())
    }

    /// Check if the model IR version is compatible
    pub fn check_version_compatibility(&self, model: &OnnxModel) -> Result<()> {
        let ir_version = model.metadata.ir_version;

        if ir_version < self.min_ir_version || ir_version > self.max_ir_version {
            return Err(Error::VersionIncompatible(format!(
                "IR version {} is not supported (min: {}, max: {})",
                ir_version, self.min_ir_version, self.max_ir_version
            )));
        }

        if !model.opset_imports.contains_key("") {
            return Err(Error::VersionIncompatible(
                "Model does not import the default operator set".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate the graph structure
    pub fn validate_graph(&self, model: &OnnxModel) -> Result<()> {
        let graph = &model.graph;

        if graph.inputs.is_empty() {
            return Err(Error::InvalidGraph("Graph has no inputs".to_string()));
        }
        if graph.outputs.is_empty() {
            return Err(Error::InvalidGraph("Graph has no outputs".to_string()));
        }

        let mut node_names = HashSet::new();
        for node in &graph.nodes {
            if !node.name.is_empty() && !node_names.insert(&node.name) {
                return Err(Error::InvalidGraph(format!("Duplicate node name: {}", node.name)));
            }
        }

        let mut output_names = HashSet::new();
        for node in &graph.nodes {
            for output in &node.outputs {
                if !output.is_empty() && !output_names.insert(output) {
                    return Err(Error::InvalidGraph(format!("Duplicate output name: {}", output)));
                }
            }
        }

        Self::check_acyclic(graph)?;
        Self::check_topological_order(graph)?;

        for node in &graph.nodes {
            let opset_version = model.opset_imports.get(&node.domain).copied().ok_or_else(|| {
                Error::InvalidOperator(format!("Unknown operator domain: {}", node.domain))
            })?;

            self.validate_node(node, opset_version)?;
        }

        Ok(())
    }

    fn check_acyclic(graph: &Graph) -> Result<()> {
        let mut dag = DiGraph::<usize, ()>::new();
        let indices: Vec<_> = (0..graph.nodes.len()).map(|i| dag.add_node(i)).collect();

        let mut producers = HashMap::new();
        for (i, node) in graph.nodes.iter().enumerate() {
            for output in node.outputs.iter().filter(|o| !o.is_empty()) {
                producers.insert(output.as_str(), i);
            }
        }

        for (i, node) in graph.nodes.iter().enumerate() {
            for input in &node.inputs {
                if let Some(&producer) = producers.get(input.as_str()) {
                    dag.add_edge(indices[producer], indices[i], ());
                }
            }
        }

        if is_cyclic_directed(&dag) {
            return Err(Error::InvalidGraph("Graph contains a cycle".to_string()));
        }

        Ok(())
    }

    /// Every node input must be a graph input, an initializer or the output
    /// of an earlier node, and every graph output must be produced.
    fn check_topological_order(graph: &Graph) -> Result<()> {
        let mut defined: HashSet<&str> = graph
            .inputs
            .iter()
            .map(|i| i.name.as_str())
            .chain(graph.initializers.iter().map(|t| t.name.as_str()))
            .collect();

        for node in &graph.nodes {
            for input in node.inputs.iter().filter(|i| !i.is_empty()) {
                if !defined.contains(input.as_str()) {
                    return Err(Error::InvalidGraph(format!(
                        "Input {} of node {} is used before it is defined",
                        input, node.name
                    )));
                }
            }
            defined.extend(node.outputs.iter().map(String::as_str));
        }

        for output in &graph.outputs {
            if !defined.contains(output.name.as_str()) {
                return Err(Error::InvalidGraph(format!(
                    "Graph output {} is not produced by any node",
                    output.name
                )));
            }
        }

        Ok(())
    }

    /// Validate a single node
    pub fn validate_node(&self, node: &Node, opset_version: i64) -> Result<()> {
        let schema = self
            .get_operator_schema(&node.op_type, &node.domain, opset_version)
            .ok_or_else(|| {
                Error::InvalidOperator(format!(
                    "Unknown operator: {}:{} (version {})",
                    node.domain, node.op_type, opset_version
                ))
            })?;

        Self::check_arity(&node.name, "input", &node.inputs, &schema.inputs)?;
        Self::check_arity(&node.name, "output", &node.outputs, &schema.outputs)?;
        Self::check_attributes(node, schema)?;

        Ok(())
    }

    /// Get the newest schema whose since_version is <= the requested version
    pub fn get_operator_schema(&self, op_type: &str, domain: &str, version: i64) -> Option<&OpSchema> {
        self.schemas
            .get(domain)?
            .get(op_type)?
            .iter()
            .rev()
            .find(|schema| schema.since_version <= version)
    }

    fn check_arity(node_name: &str, kind: &str, actual: &[String], params: &[FormalParameter]) -> Result<()> {
        for (i, param) in params.iter().enumerate() {
            let present = actual.get(i).map(|name| !name.is_empty()).unwrap_or(false);
            if !present && !param.optional {
                return Err(Error::ValidationError(format!(
                    "Node {} is missing required {} {}",
                    node_name, kind, param.name
                )));
            }
        }

        if actual.len() > params.len() {
            return Err(Error::ValidationError(format!(
                "Node {} has too many {}s ({} > {})",
                node_name,
                kind,
                actual.len(),
                params.len()
            )));
        }

        Ok(())
    }

    fn check_attributes(node: &Node, schema: &OpSchema) -> Result<()> {
        for (name, attr_schema) in &schema.attributes {
            if attr_schema.required && !node.attributes.contains_key(name) {
                return Err(Error::ValidationError(format!(
                    "Node {} is missing required attribute {}",
                    node.name, name
                )));
            }
        }

        for (name, attr) in &node.attributes {
            match schema.attributes.get(name) {
                Some(attr_schema) if attr.attribute_type() != attr_schema.type_ => {
                    return Err(Error::ValidationError(format!(
                        "Attribute {} type mismatch in node {}",
                        name, node.name
                    )));
                }
                Some(_) => {}
                None => {
                    return Err(Error::ValidationError(format!(
                        "Node {} has unknown attribute {} for {}",
                        node.name, name, schema.name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Validate initializer payloads and their agreement with declared inputs
    pub fn validate_tensor_shapes(&self, graph: &Graph) -> Result<()> {
        for initializer in &graph.initializers {
            if initializer.dims.iter().any(|&d| d < 0) {
                return Err(Error::ValidationError(format!(
                    "Initializer {} has a negative dimension",
                    initializer.name
                )));
            }

            if initializer.data_type == DataType::Float && !initializer.data.is_empty() {
                let expected = initializer
                    .element_count()
                    .and_then(|n| n.checked_mul(4))
                    .ok_or_else(|| {
                        Error::ValidationError(format!(
                            "Initializer {} has dimensions too large to address: {:?}",
                            initializer.name, initializer.dims
                        ))
                    })?;
                if initializer.data.len() != expected {
                    return Err(Error::ValidationError(format!(
                        "Initializer {} holds {} bytes, expected {}",
                        initializer.name,
                        initializer.data.len(),
                        expected
                    )));
                }
            }

            if let Some(existing) = graph.inputs.iter().find(|i| i.name == initializer.name) {
                if existing.data_type != initializer.data_type {
                    return Err(Error::ValidationError(format!(
                        "Type mismatch for tensor {}: {:?} vs {:?}",
                        initializer.name, existing.data_type, initializer.data_type
                    )));
                }

                if existing.shape.len() != initializer.dims.len() {
                    return Err(Error::ValidationError(format!(
                        "Shape mismatch for tensor {}: dimensions don't match",
                        initializer.name
                    )));
                }
            }
        }

        Ok(())
    }
}
