use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{error, info};
use serde::Serialize;

use crate::config::ProfilerConfig;
use crate::error::Result;

use super::backend::{Backend, BackendPolicy, BackendSelector, InferenceRuntime};
use super::exporter::{ExportOptions, Exporter, TraceableModel};
use super::shape::InputShape;
use super::validator::{ModelValidator, ValidationPolicy};

/// Outcome of one conversion call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionResult {
    pub success: bool,
    pub message: String,
    /// Present only on success
    pub artifact_path: Option<PathBuf>,
    pub artifact_size_bytes: Option<u64>,
    /// Checker complaint that was tolerated because the artifact exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_warning: Option<String>,
    /// Backends serving the session, when one was requested
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub backends: Vec<Backend>,
}

impl ConversionResult {
    fn failed(message: String) -> Self {
        Self {
            success: false,
            message,
            artifact_path: None,
            artifact_size_bytes: None,
            validation_warning: None,
            backends: Vec::new(),
        }
    }
}

/// A conversion result and, on success, the session built over the artifact
#[derive(Debug)]
pub struct LoadedConversion<S> {
    pub result: ConversionResult,
    pub session: Option<S>,
}

/// Export, validate and optionally load a model as one operation.
///
/// No failed call leaves an artifact at the target path. Callers must not
/// run two conversions against the same path at once.
pub struct ConversionPipeline {
    exporter: Exporter,
    validator: ModelValidator,
    backend_policy: BackendPolicy,
}

impl Default for ConversionPipeline {
    fn default() -> Self {
        Self::new(
            ExportOptions::default(),
            ValidationPolicy::default(),
            BackendPolicy::default(),
        )
    }
}

impl ConversionPipeline {
    pub fn new(export: ExportOptions, validation: ValidationPolicy, backend_policy: BackendPolicy) -> Self {
        Self {
            exporter: Exporter::new(export),
            validator: ModelValidator::new(validation),
            backend_policy,
        }
    }

    pub fn from_config(config: &ProfilerConfig) -> Self {
        Self::new(
            config.export.clone(),
            config.validation.clone(),
            config.backend.clone(),
        )
    }

    /// Export and validate. Errors never escape; they become a failed result.
    pub fn convert<M>(&self, model: &mut M, shape: &InputShape, target: &Path) -> ConversionResult
    where
        M: TraceableModel + ?Sized,
    {
        let summary = match self.exporter.export(model, shape, target) {
            Ok(summary) => summary,
            Err(e) => {
                remove_artifact(target);
                return ConversionResult::failed(e.to_string());
            }
        };

        let outcome = match self.validator.validate(target) {
            Ok(outcome) => outcome,
            Err(e) => {
                remove_artifact(target);
                return ConversionResult::failed(e.to_string());
            }
        };

        info!(
            "Exported {} ({} bytes, input {})",
            target.display(),
            summary.bytes_written,
            shape
        );

        ConversionResult {
            success: true,
            message: format!("Model exported to {}", target.display()),
            artifact_path: Some(target.to_path_buf()),
            artifact_size_bytes: Some(summary.bytes_written as u64),
            validation_warning: outcome.warning().map(str::to_string),
            backends: Vec::new(),
        }
    }

    /// Convert, then build an inference session over the artifact.
    ///
    /// Export and validation failures come back as a failed result with no
    /// session. If no backend (CPU included) can host the artifact, it is
    /// removed and the backend error is returned.
    pub fn convert_and_load<M, R>(
        &self,
        model: &mut M,
        shape: &InputShape,
        target: &Path,
        runtime: &R,
    ) -> Result<LoadedConversion<R::Session>>
    where
        M: TraceableModel + ?Sized,
        R: InferenceRuntime,
    {
        let mut result = self.convert(model, shape, target);
        if !result.success {
            return Ok(LoadedConversion { result, session: None });
        }

        let selection = BackendSelector::new(runtime, self.backend_policy.clone())
            .select(target)
            .map_err(|e| {
                remove_artifact(target);
                e
            })?;

        result.backends = selection.backends;
        Ok(LoadedConversion {
            result,
            session: Some(selection.session),
        })
    }
}

fn remove_artifact(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => info!("Removed artifact {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => error!("Failed to remove artifact {}: {}", path.display(), e),
    }
}
