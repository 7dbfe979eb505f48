// Bottleneck rule engine
// Evaluates fixed heuristics per record and ranks the pooled findings

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};

use super::record::ProfileRecord;

/// Bottleneck labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum Bottleneck {
    #[strum(serialize = "Hardware underutilized")]
    #[serde(rename = "Hardware underutilized")]
    HardwareUnderutilized,
    #[strum(serialize = "Inefficient memory usage")]
    #[serde(rename = "Inefficient memory usage")]
    InefficientMemoryUsage,
    #[strum(serialize = "Precision-sensitive model")]
    #[serde(rename = "Precision-sensitive model")]
    PrecisionSensitive,
    #[strum(serialize = "No data")]
    #[serde(rename = "No data")]
    NoData,
    #[strum(serialize = "No clear bottleneck detected")]
    #[serde(rename = "No clear bottleneck detected")]
    NoClearBottleneck,
}

/// A ranked diagnosis
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub bottleneck: Bottleneck,
    pub reason: String,
    /// Fixed per rule, in [0, 1]
    pub confidence: f64,
}

impl Finding {
    fn no_data() -> Self {
        Self {
            bottleneck: Bottleneck::NoData,
            reason: "Empty profile results provided".to_string(),
            confidence: 0.0,
        }
    }

    fn no_clear_bottleneck() -> Self {
        Self {
            bottleneck: Bottleneck::NoClearBottleneck,
            reason: "Model performs within expected parameters".to_string(),
            confidence: 0.60,
        }
    }
}

/// Thresholds for the bottleneck rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BottleneckThresholds {
    /// Latency above which a run counts as slow
    pub high_latency_ms: f64,
    /// GPU utilization below which the device counts as idle
    pub low_gpu_util_pct: f64,
    pub high_memory_mb: f64,
    /// Largest batch still considered "small"
    pub max_small_batch: i64,
    pub min_fp16_speedup: f64,
}

impl Default for BottleneckThresholds {
    fn default() -> Self {
        Self {
            high_latency_ms: 50.0,
            low_gpu_util_pct: 30.0,
            high_memory_mb: 1000.0,
            max_small_batch: 1,
            min_fp16_speedup: 1.2,
        }
    }
}

struct BottleneckRule {
    bottleneck: Bottleneck,
    confidence: f64,
    /// Returns the rendered reason when the rule fires
    evaluate: fn(&ProfileRecord, &BottleneckThresholds) -> Option<String>,
}

const RULES: &[BottleneckRule] = &[
    BottleneckRule {
        bottleneck: Bottleneck::HardwareUnderutilized,
        confidence: 0.82,
        evaluate: hardware_underutilized,
    },
    BottleneckRule {
        bottleneck: Bottleneck::InefficientMemoryUsage,
        confidence: 0.78,
        evaluate: inefficient_memory_usage,
    },
    BottleneckRule {
        bottleneck: Bottleneck::PrecisionSensitive,
        confidence: 0.85,
        evaluate: precision_sensitive,
    },
];

fn hardware_underutilized(record: &ProfileRecord, t: &BottleneckThresholds) -> Option<String> {
    let latency = record.latency_ms?;
    let gpu_util = record.gpu_util?;
    (latency > t.high_latency_ms && gpu_util < t.low_gpu_util_pct).then(|| {
        format!(
            "High latency ({:.1}ms) with low GPU utilization ({:.1}%)",
            latency, gpu_util
        )
    })
}

fn inefficient_memory_usage(record: &ProfileRecord, t: &BottleneckThresholds) -> Option<String> {
    let memory = record.memory_mb?;
    let batch = record.batch?;
    (memory > t.high_memory_mb && batch <= t.max_small_batch)
        .then(|| format!("High memory usage ({:.1}MB) at batch size {}", memory, batch))
}

fn precision_sensitive(record: &ProfileRecord, t: &BottleneckThresholds) -> Option<String> {
    let speedup = record.speedup_over_fp32.unwrap_or(0.0);
    (record.is_precision("FP16") && speedup > t.min_fp16_speedup)
        .then(|| "FP16 significantly outperforms FP32".to_string())
}

/// Classifies profiling records into ranked bottleneck findings
#[derive(Debug, Clone, Default)]
pub struct BottleneckAnalyzer {
    thresholds: BottleneckThresholds,
}

impl BottleneckAnalyzer {
    pub fn new(thresholds: BottleneckThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &BottleneckThresholds {
        &self.thresholds
    }

    /// Analyze raw records. Entries that are not JSON objects are skipped.
    pub fn analyze(&self, results: &[Value]) -> Vec<Finding> {
        if results.is_empty() {
            return vec![Finding::no_data()];
        }

        let records: Vec<ProfileRecord> = results
            .iter()
            .enumerate()
            .filter_map(|(i, value)| {
                let record = ProfileRecord::from_value(value);
                if record.is_none() {
                    debug!("Skipping profile entry {}: not an object", i);
                }
                record
            })
            .collect();

        self.rank(self.collect_findings(&records))
    }

    pub fn analyze_records(&self, records: &[ProfileRecord]) -> Vec<Finding> {
        if records.is_empty() {
            return vec![Finding::no_data()];
        }
        self.rank(self.collect_findings(records))
    }

    fn collect_findings(&self, records: &[ProfileRecord]) -> Vec<Finding> {
        let mut findings = Vec::new();

        for (i, record) in records.iter().enumerate() {
            if !record.is_well_formed() {
                debug!(
                    "Skipping profile record {}: non-numeric {:?}",
                    i, record.malformed_fields
                );
                continue;
            }

            for rule in RULES {
                if let Some(reason) = (rule.evaluate)(record, &self.thresholds) {
                    findings.push(Finding {
                        bottleneck: rule.bottleneck,
                        reason,
                        confidence: rule.confidence,
                    });
                }
            }
        }

        findings
    }

    fn rank(&self, mut findings: Vec<Finding>) -> Vec<Finding> {
        if findings.is_empty() {
            return vec![Finding::no_clear_bottleneck()];
        }
        // Stable, so ties keep input order
        findings.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        findings
    }
}

/// Analyze profiling results with the default thresholds
pub fn analyze_bottleneck(profile_results: &[Value]) -> Vec<Finding> {
    BottleneckAnalyzer::default().analyze(profile_results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_input_is_no_data() {
        let findings = analyze_bottleneck(&[]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].bottleneck, Bottleneck::NoData);
        assert_eq!(findings[0].confidence, 0.0);
    }

    #[test]
    fn test_quiet_records_give_no_clear_bottleneck() {
        let findings = analyze_bottleneck(&[json!({
            "latency_ms": 10, "gpu_util": 90, "memory_mb": 100, "batch": 8, "precision": "FP32"
        })]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].bottleneck, Bottleneck::NoClearBottleneck);
        assert_eq!(findings[0].confidence, 0.60);
    }

    #[test]
    fn test_hardware_underutilized_reason() {
        let findings = analyze_bottleneck(&[json!({
            "latency_ms": 60, "gpu_util": 20, "memory_mb": 500, "batch": 4, "precision": "FP32"
        })]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].bottleneck, Bottleneck::HardwareUnderutilized);
        assert_eq!(findings[0].confidence, 0.82);
        assert!(findings[0].reason.contains("60.0ms"));
        assert!(findings[0].reason.contains("20.0%"));
    }

    #[test]
    fn test_boundaries_are_exclusive() {
        let findings = analyze_bottleneck(&[json!({
            "latency_ms": 50, "gpu_util": 30, "memory_mb": 1000, "batch": 1
        })]);
        assert_eq!(findings[0].bottleneck, Bottleneck::NoClearBottleneck);
    }

    #[test]
    fn test_missing_speedup_does_not_fire() {
        let findings = analyze_bottleneck(&[json!({"precision": "FP16", "latency_ms": 10})]);
        assert_eq!(findings[0].bottleneck, Bottleneck::NoClearBottleneck);
    }

    #[test]
    fn test_custom_thresholds() {
        let analyzer = BottleneckAnalyzer::new(BottleneckThresholds {
            high_memory_mb: 400.0,
            max_small_batch: 4,
            ..Default::default()
        });
        let findings = analyzer.analyze(&[json!({"memory_mb": 500, "batch": 4})]);
        assert_eq!(findings[0].bottleneck, Bottleneck::InefficientMemoryUsage);
        assert_eq!(findings[0].reason, "High memory usage (500.0MB) at batch size 4");
    }

    #[test]
    fn test_ties_keep_input_order() {
        let findings = analyze_bottleneck(&[
            json!({"latency_ms": 70, "gpu_util": 5}),
            json!({"latency_ms": 80, "gpu_util": 5}),
        ]);
        assert_eq!(findings.len(), 2);
        assert!(findings[0].reason.contains("70.0ms"));
        assert!(findings[1].reason.contains("80.0ms"));
    }

    #[test]
    fn test_labels_render_and_serialize() {
        assert_eq!(Bottleneck::PrecisionSensitive.to_string(), "Precision-sensitive model");
        let value = serde_json::to_value(Finding::no_data()).unwrap();
        assert_eq!(value["bottleneck"], "No data");
        assert_eq!(value["confidence"], 0.0);
    }
}
