use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::debug;
use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{DataType, Dimension, Graph, ModelMetadata, Node, OnnxModel, Tensor, TensorInfo};
use crate::parser::OnnxModelWriter;

use super::shape::{dims_with_batch_axis, InputShape};

/// Graph captured by running a model once on a sample input
#[derive(Debug, Clone)]
pub struct Trace {
    /// Nodes in execution order. The first consumes the exporter's input
    /// name and the last produces its output name.
    pub nodes: Vec<Node>,
    /// Parameters referenced by the nodes
    pub initializers: Vec<Tensor>,
    /// Concrete shape of the output for the sample input
    pub output_shape: Vec<usize>,
}

/// A resident model that can be switched to inference mode and traced.
pub trait TraceableModel {
    /// Switch to inference mode
    fn eval(&mut self);

    fn is_training(&self) -> bool;

    /// Run the model on `sample`, recording the operations it performs
    fn trace(&self, input_name: &str, output_name: &str, sample: &ArrayD<f32>) -> Result<Trace>;
}

/// Options controlling the exported artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// Default operator set version
    pub opset_version: i64,
    /// IR version stamped on the model
    pub ir_version: i64,
    pub input_name: String,
    pub output_name: String,
    /// Export axis 0 of input and output as a symbolic dimension
    pub dynamic_batch: bool,
    pub dynamic_axis_name: String,
    /// Embed parameters as initializers instead of exposing them as inputs
    pub export_params: bool,
    pub producer_name: String,
    pub producer_version: String,
    /// Seed for the sample input. `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            opset_version: 12,
            ir_version: 7,
            input_name: "input".to_string(),
            output_name: "output".to_string(),
            dynamic_batch: true,
            dynamic_axis_name: "batch_size".to_string(),
            export_params: true,
            producer_name: env!("CARGO_PKG_NAME").to_string(),
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
            seed: None,
        }
    }
}

impl ExportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the operator set version
    pub fn set_opset_version(mut self, opset_version: i64) -> Self {
        self.opset_version = opset_version;
        self
    }

    /// Enable or disable the dynamic batch axis
    pub fn dynamic_batch(mut self, enable: bool) -> Self {
        self.dynamic_batch = enable;
        self
    }

    /// Enable or disable embedding of parameters
    pub fn export_params(mut self, enable: bool) -> Self {
        self.export_params = enable;
        self
    }

    /// Fix the seed used for the sample input
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// What a successful export produced
#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bytes_written: usize,
    pub input_shape: Vec<Dimension>,
    pub output_shape: Vec<Dimension>,
}

/// Converts traceable models into ONNX files
#[derive(Debug, Clone, Default)]
pub struct Exporter {
    options: ExportOptions,
}

impl Exporter {
    pub fn new(options: ExportOptions) -> Self {
        Self { options }
    }

    /// Export `model` to `path`.
    ///
    /// Every failure is reported as [`Error::ExportError`]. A partial file
    /// may remain at `path`; removing it is the caller's job.
    pub fn export<M>(&self, model: &mut M, shape: &InputShape, path: &Path) -> Result<ExportSummary>
    where
        M: TraceableModel + ?Sized,
    {
        self.export_inner(model, shape, path).map_err(|e| match e {
            Error::ExportError(_) => e,
            other => Error::ExportError(other.to_string()),
        })
    }

    fn export_inner<M>(&self, model: &mut M, shape: &InputShape, path: &Path) -> Result<ExportSummary>
    where
        M: TraceableModel + ?Sized,
    {
        model.eval();
        if model.is_training() {
            return Err(Error::ExportError("model did not switch to inference mode".to_string()));
        }

        let sample = self.sample_input(shape)?;
        let trace = model.trace(&self.options.input_name, &self.options.output_name, &sample)?;
        if trace.output_shape.is_empty() {
            return Err(Error::ExportError("traced model produced a scalar output".to_string()));
        }
        debug!(
            "Traced {} nodes, output shape {:?}",
            trace.nodes.len(),
            trace.output_shape
        );

        let onnx = self.build_model(shape, trace);
        let input_shape = onnx.graph.inputs[0].shape.clone();
        let output_shape = onnx.graph.outputs[0].shape.clone();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let bytes_written = OnnxModelWriter::write_model(&onnx, path)?;

        Ok(ExportSummary {
            bytes_written,
            input_shape,
            output_shape,
        })
    }

    fn sample_input(&self, shape: &InputShape) -> Result<ArrayD<f32>> {
        let mut rng = match self.options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let values: Vec<f32> = (0..shape.element_count())
            .map(|_| rng.sample(StandardNormal))
            .collect();
        ArrayD::from_shape_vec(IxDyn(shape.dims()), values)
            .map_err(|e| Error::InvalidShape(format!("{}: {}", shape, e)))
    }

    fn build_model(&self, shape: &InputShape, trace: Trace) -> OnnxModel {
        let opts = &self.options;
        let dynamic_axis = opts.dynamic_batch.then(|| opts.dynamic_axis_name.as_str());

        let mut inputs = vec![TensorInfo {
            name: opts.input_name.clone(),
            shape: shape.to_onnx_dims(dynamic_axis),
            data_type: DataType::Float,
            doc_string: String::new(),
        }];
        let outputs = vec![TensorInfo {
            name: opts.output_name.clone(),
            shape: dims_with_batch_axis(&trace.output_shape, dynamic_axis),
            data_type: DataType::Float,
            doc_string: String::new(),
        }];

        let initializers = if opts.export_params {
            trace.initializers
        } else {
            inputs.extend(trace.initializers.iter().map(|t| TensorInfo {
                name: t.name.clone(),
                shape: t.dims.iter().map(|&d| Dimension::Value(d)).collect(),
                data_type: t.data_type,
                doc_string: String::new(),
            }));
            Vec::new()
        };

        let mut opset_imports = HashMap::new();
        opset_imports.insert(String::new(), opts.opset_version);

        OnnxModel {
            metadata: ModelMetadata {
                producer_name: opts.producer_name.clone(),
                producer_version: opts.producer_version.clone(),
                domain: String::new(),
                model_version: 1,
                doc_string: String::new(),
                graph_name: "main_graph".to_string(),
                ir_version: opts.ir_version,
            },
            graph: Graph {
                name: "main_graph".to_string(),
                nodes: trace.nodes,
                inputs,
                outputs,
                initializers,
                value_info: Vec::new(),
                doc_string: String::new(),
            },
            opset_imports,
            metadata_props: HashMap::new(),
        }
    }
}
