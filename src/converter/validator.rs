use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::parser::{OnnxModelLoader, SchemaValidator};

/// How checker failures are treated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationPolicy {
    /// Accept an artifact the checker rejects as long as the file exists
    pub lenient_when_present: bool,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            lenient_when_present: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// The checker accepted the artifact
    Valid,
    /// The checker rejected the artifact but the file is present
    AcceptedWithWarning(String),
}

impl ValidationOutcome {
    pub fn warning(&self) -> Option<&str> {
        match self {
            ValidationOutcome::Valid => None,
            ValidationOutcome::AcceptedWithWarning(w) => Some(w),
        }
    }
}

/// Confirms an exported artifact is a well-formed ONNX graph
pub struct ModelValidator {
    checker: SchemaValidator,
    policy: ValidationPolicy,
}

impl Default for ModelValidator {
    fn default() -> Self {
        Self::new(ValidationPolicy::default())
    }
}

impl ModelValidator {
    pub fn new(policy: ValidationPolicy) -> Self {
        Self {
            checker: SchemaValidator::new(),
            policy,
        }
    }

    pub fn validate(&self, path: &Path) -> Result<ValidationOutcome> {
        let err = match self.check(path) {
            Ok(()) => return Ok(ValidationOutcome::Valid),
            Err(e) => e,
        };

        if self.policy.lenient_when_present && path.is_file() {
            warn!(
                "Checker rejected {} but the file exists, accepting it: {}",
                path.display(),
                err
            );
            return Ok(ValidationOutcome::AcceptedWithWarning(err.to_string()));
        }

        Err(Error::ValidationError(format!("{}: {}", path.display(), err)))
    }

    fn check(&self, path: &Path) -> Result<()> {
        let model = OnnxModelLoader::load_model(path)?;
        self.checker.validate_model(&model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataType, Dimension, Graph, ModelMetadata, Node, OnnxModel, Tensor, TensorInfo};
    use crate::parser::OnnxModelWriter;
    use std::collections::HashMap;
    use std::fs;

    #[test]
    fn test_missing_file_is_hard_failure() {
        let dir = tempfile::tempdir().unwrap();
        let result = ModelValidator::default().validate(&dir.path().join("absent.onnx"));
        assert!(matches!(result, Err(Error::ValidationError(_))));
    }

    #[test]
    fn test_present_but_rejected_file_is_accepted_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.onnx");
        fs::write(&path, b"not a protobuf model").unwrap();

        let outcome = ModelValidator::default().validate(&path).unwrap();
        assert!(outcome.warning().is_some());
    }

    fn write_oversized_model(path: &Path) {
        let mut opset_imports = HashMap::new();
        opset_imports.insert(String::new(), 12);
        let info = |name: &str| TensorInfo {
            name: name.to_string(),
            shape: vec![Dimension::Value(1), Dimension::Value(4)],
            data_type: DataType::Float,
            doc_string: String::new(),
        };

        let model = OnnxModel {
            metadata: ModelMetadata {
                ir_version: 7,
                ..Default::default()
            },
            graph: Graph {
                name: "g".to_string(),
                nodes: vec![Node::new(0, "add", "Add")
                    .with_inputs(["input", "w"])
                    .with_outputs(["output"])],
                inputs: vec![info("input")],
                outputs: vec![info("output")],
                initializers: vec![Tensor {
                    dims: vec![i64::MAX, 4],
                    ..Tensor::from_f32("w", vec![1, 4], &[0.0; 4])
                }],
                ..Default::default()
            },
            opset_imports,
            metadata_props: HashMap::new(),
        };
        OnnxModelWriter::write_model(&model, path).unwrap();
    }

    #[test]
    fn test_oversized_initializer_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.onnx");
        write_oversized_model(&path);

        let strict = ModelValidator::new(ValidationPolicy {
            lenient_when_present: false,
        });
        let err = strict.validate(&path).unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
        assert!(err.to_string().contains("too large"));

        let outcome = ModelValidator::default().validate(&path).unwrap();
        assert!(outcome.warning().unwrap().contains("too large"));
    }

    #[test]
    fn test_strict_policy_rejects_present_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.onnx");
        fs::write(&path, b"not a protobuf model").unwrap();

        let validator = ModelValidator::new(ValidationPolicy {
            lenient_when_present: false,
        });
        assert!(matches!(validator.validate(&path), Err(Error::ValidationError(_))));
    }
}
