use std::fs;
use std::path::Path;

use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use onnx_profiler::converter::{
    Backend, BackendPolicy, ConversionPipeline, ExportOptions, InferenceRuntime, InputShape,
    ReferenceRuntime, Trace, TraceableModel, ValidationPolicy,
};
use onnx_profiler::error::{Error, Result};
use onnx_profiler::model::{Dimension, Node};
use onnx_profiler::nn::{Layer, Sequential};
use onnx_profiler::{OnnxModelLoader, ProfilerConfig};

fn small_classifier() -> Sequential {
    let mut rng = StdRng::seed_from_u64(7);
    Sequential::new()
        .push(Layer::Flatten)
        .push(Layer::linear_init(12, 8, &mut rng))
        .push(Layer::Relu)
        .push(Layer::Dropout { ratio: 0.1 })
        .push(Layer::linear_init(8, 3, &mut rng))
}

fn seeded_pipeline(validation: ValidationPolicy) -> ConversionPipeline {
    ConversionPipeline::new(
        ExportOptions::new().set_seed(42),
        validation,
        BackendPolicy::default(),
    )
}

fn strict() -> ValidationPolicy {
    ValidationPolicy {
        lenient_when_present: false,
    }
}

/// Traces to an operator the checker does not know
struct CustomOpModel;

impl TraceableModel for CustomOpModel {
    fn eval(&mut self) {}

    fn is_training(&self) -> bool {
        false
    }

    fn trace(&self, input_name: &str, output_name: &str, sample: &ArrayD<f32>) -> Result<Trace> {
        Ok(Trace {
            nodes: vec![Node::new(0, "gelu_0", "Gelu")
                .with_inputs([input_name])
                .with_outputs([output_name])],
            initializers: Vec::new(),
            output_shape: sample.shape().to_vec(),
        })
    }
}

/// A runtime where not even CPU sessions can be built
struct BrokenRuntime;

impl InferenceRuntime for BrokenRuntime {
    type Session = ();

    fn available_backends(&self) -> Vec<Backend> {
        vec![Backend::Cuda, Backend::Cpu]
    }

    fn create_session(&self, _: &Path, backends: &[Backend]) -> Result<()> {
        Err(Error::BackendError(format!("cannot start {:?}", backends)))
    }
}

#[test]
fn test_successful_conversion_leaves_valid_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("model.onnx");
    let mut model = small_classifier();
    let shape: InputShape = "2,3,4".parse().unwrap();

    let result = seeded_pipeline(ValidationPolicy::default()).convert(&mut model, &shape, &target);

    assert!(result.success, "{}", result.message);
    assert_eq!(result.message, format!("Model exported to {}", target.display()));
    assert_eq!(result.artifact_path.as_deref(), Some(target.as_path()));
    assert_eq!(result.artifact_size_bytes, Some(fs::metadata(&target).unwrap().len()));
    assert!(result.validation_warning.is_none());
    assert!(!model.is_training());

    let onnx = OnnxModelLoader::load_model(&target).unwrap();
    let input = &OnnxModelLoader::get_input_info(&onnx)[0];
    let output = &OnnxModelLoader::get_output_info(&onnx)[0];

    assert_eq!(input.name, "input");
    assert_eq!(
        input.shape,
        vec![
            Dimension::Param("batch_size".to_string()),
            Dimension::Value(3),
            Dimension::Value(4)
        ]
    );
    assert_eq!(output.name, "output");
    assert_eq!(
        output.shape,
        vec![Dimension::Param("batch_size".to_string()), Dimension::Value(3)]
    );

    let ops: Vec<&str> = onnx.graph.nodes.iter().map(|n| n.op_type.as_str()).collect();
    assert_eq!(ops, vec!["Flatten", "Gemm", "Relu", "Gemm"]);
    assert_eq!(onnx.opset_imports.get(""), Some(&12));
    assert_eq!(onnx.metadata.ir_version, 7);
    assert_eq!(onnx.graph.initializers.len(), 4);
}

#[test]
fn test_shape_mismatch_fails_without_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("model.onnx");
    let mut model = small_classifier();
    let shape: InputShape = "1,5".parse().unwrap();

    let result = ConversionPipeline::default().convert(&mut model, &shape, &target);

    assert!(!result.success);
    assert!(result.message.starts_with("Export failed"), "{}", result.message);
    assert!(result.artifact_path.is_none());
    assert!(result.artifact_size_bytes.is_none());
    assert!(!target.exists());
}

#[test]
fn test_failed_export_removes_stale_file() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("model.onnx");
    fs::write(&target, b"left over from an earlier run").unwrap();

    let mut model = small_classifier();
    let shape: InputShape = "1,5".parse().unwrap();
    let result = ConversionPipeline::default().convert(&mut model, &shape, &target);

    assert!(!result.success);
    assert!(!target.exists());
}

#[test]
fn test_strict_validation_failure_removes_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("custom.onnx");
    let shape = InputShape::new(vec![1, 4]).unwrap();

    let result = seeded_pipeline(strict()).convert(&mut CustomOpModel, &shape, &target);

    assert!(!result.success);
    assert!(result.message.starts_with("Validation error"), "{}", result.message);
    assert!(!target.exists());
}

#[test]
fn test_lenient_validation_keeps_artifact_with_warning() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("custom.onnx");
    let shape = InputShape::new(vec![1, 4]).unwrap();

    let result =
        seeded_pipeline(ValidationPolicy::default()).convert(&mut CustomOpModel, &shape, &target);

    assert!(result.success);
    assert!(result.validation_warning.unwrap().contains("Gelu"));
    assert!(target.is_file());
}

#[test]
fn test_missing_parent_directories_are_created() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("nested").join("deeper").join("model.onnx");
    let mut model = small_classifier();
    let shape: InputShape = "[1, 12]".parse().unwrap();

    let result = ConversionPipeline::default().convert(&mut model, &shape, &target);

    assert!(result.success, "{}", result.message);
    assert!(target.is_file());
}

#[test]
fn test_params_as_inputs_when_not_exported() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("model.onnx");
    let pipeline = ConversionPipeline::new(
        ExportOptions::new().export_params(false).dynamic_batch(false),
        ValidationPolicy::default(),
        BackendPolicy::default(),
    );
    let mut model = small_classifier();
    let shape: InputShape = "2,12".parse().unwrap();

    let result = pipeline.convert(&mut model, &shape, &target);
    assert!(result.success, "{}", result.message);

    let onnx = OnnxModelLoader::load_model(&target).unwrap();
    assert!(onnx.graph.initializers.is_empty());
    assert_eq!(onnx.graph.inputs.len(), 5);
    assert_eq!(onnx.graph.inputs[0].shape, vec![Dimension::Value(2), Dimension::Value(12)]);
}

#[test]
fn test_convert_and_load_on_cpu() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("model.onnx");
    let mut model = small_classifier();
    let shape: InputShape = "1,3,4".parse().unwrap();

    let loaded = ConversionPipeline::default()
        .convert_and_load(&mut model, &shape, &target, &ReferenceRuntime::new())
        .unwrap();

    assert!(loaded.result.success);
    assert_eq!(loaded.result.backends, vec![Backend::Cpu]);

    let session = loaded.session.unwrap();
    assert_eq!(session.backend(), Backend::Cpu);
    assert_eq!(session.inputs()[0].name, "input");
    assert_eq!(session.outputs()[0].name, "output");
}

#[test]
fn test_accelerator_failure_falls_back_to_cpu() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("model.onnx");
    let mut model = small_classifier();
    let shape: InputShape = "1,12".parse().unwrap();
    let runtime = ReferenceRuntime::with_advertised(vec![Backend::Cuda, Backend::Cpu]);

    let loaded = ConversionPipeline::default()
        .convert_and_load(&mut model, &shape, &target, &runtime)
        .unwrap();

    assert!(loaded.session.is_some());
    assert_eq!(loaded.result.backends, vec![Backend::Cpu]);

    let json = serde_json::to_value(&loaded.result).unwrap();
    assert_eq!(json["backends"], serde_json::json!(["CPU"]));
    assert_eq!(json["success"], serde_json::json!(true));
}

#[test]
fn test_backend_failure_removes_artifact_and_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("model.onnx");
    let mut model = small_classifier();
    let shape: InputShape = "1,12".parse().unwrap();

    let result =
        ConversionPipeline::default().convert_and_load(&mut model, &shape, &target, &BrokenRuntime);

    assert!(matches!(result, Err(Error::BackendError(_))));
    assert!(!target.exists());
}

#[test]
fn test_export_failure_skips_session_creation() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("model.onnx");
    let mut model = small_classifier();
    let shape: InputShape = "1,5".parse().unwrap();

    let loaded = ConversionPipeline::default()
        .convert_and_load(&mut model, &shape, &target, &BrokenRuntime)
        .unwrap();

    assert!(!loaded.result.success);
    assert!(loaded.session.is_none());
    assert!(loaded.result.backends.is_empty());
}

#[test]
fn test_pipeline_from_config() -> anyhow::Result<()> {
    let config = ProfilerConfig::from_json_str(
        r#"{ "export": { "opset_version": 13, "dynamic_axis_name": "N", "seed": 3 } }"#,
    )?;
    let dir = tempfile::tempdir()?;
    let target = dir.path().join("model.onnx");
    let mut model = small_classifier();
    let shape: InputShape = "1,12".parse()?;

    let result = ConversionPipeline::from_config(&config).convert(&mut model, &shape, &target);
    assert!(result.success, "{}", result.message);

    let onnx = OnnxModelLoader::load_model(&target)?;
    assert_eq!(onnx.opset_imports.get(""), Some(&13));
    assert_eq!(onnx.graph.inputs[0].shape[0], Dimension::Param("N".to_string()));

    Ok(())
}

#[test]
fn test_sample_model_traces_to_same_shape() {
    let model = small_classifier();
    let x = ArrayD::<f32>::zeros(IxDyn(&[4, 3, 4]));
    assert_eq!(model.forward(&x).unwrap().shape(), &[4, 3]);
}

#[test]
fn test_oversized_shape_is_rejected_before_export() {
    let err = "1099511627776,1099511627776".parse::<InputShape>().unwrap_err();
    assert!(matches!(err, Error::InvalidShape(_)));
    assert!(err.to_string().starts_with("Invalid input shape"));

    // A shape that builds but does not fit the model fails as a result
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("model.onnx");
    let mut model = small_classifier();
    let shape = InputShape::new(vec![1, 7]).unwrap();

    let result = ConversionPipeline::default().convert(&mut model, &shape, &target);
    assert!(!result.success);
    assert!(!target.exists());
}
