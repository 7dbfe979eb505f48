use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::analysis::{BottleneckThresholds, InsightThresholds};
use crate::converter::{BackendPolicy, ExportOptions, ValidationPolicy};
use crate::error::{Error, Result};

/// Thresholds for both reporting modes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub bottleneck: BottleneckThresholds,
    pub insight: InsightThresholds,
}

/// Top-level settings. Every section and field is optional in JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    pub export: ExportOptions,
    pub validation: ValidationPolicy,
    pub backend: BackendPolicy,
    pub analysis: AnalyzerConfig,
}

impl ProfilerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::ConfigError(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))
    }
}
