use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::record::ProfileRecord;

pub const GPU_UNDERUTILIZED: &str = "GPU underutilized (possible CPU or data-loading bottleneck)";
pub const HIGH_LATENCY: &str = "High inference latency";
pub const HIGH_MEMORY: &str = "High memory usage";
pub const FP16_SPEEDUP: &str = "FP16 provides noticeable speedup";
pub const NO_MAJOR_BOTTLENECK: &str = "No major bottleneck detected";

/// Issue tags attached to a single run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    pub runtime: Option<String>,
    pub precision: Option<String>,
    pub batch: Option<i64>,
    /// Never empty
    pub issues: Vec<String>,
}

/// Thresholds for per-run tags. These are separate from the bottleneck
/// rule thresholds and deliberately not shared with them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightThresholds {
    pub low_gpu_util_pct: f64,
    pub high_latency_ms: f64,
    pub high_memory_mb: f64,
    /// FP16 must run below this fraction of the FP32 latency
    pub fp16_latency_ratio: f64,
}

impl Default for InsightThresholds {
    fn default() -> Self {
        Self {
            low_gpu_util_pct: 40.0,
            high_latency_ms: 50.0,
            high_memory_mb: 800.0,
            fp16_latency_ratio: 0.9,
        }
    }
}

struct InsightRule {
    tag: &'static str,
    applies: fn(&ProfileRecord, &InsightThresholds) -> bool,
}

const INSIGHT_RULES: &[InsightRule] = &[
    InsightRule {
        tag: GPU_UNDERUTILIZED,
        applies: |r, t| r.gpu_util.map_or(false, |g| g < t.low_gpu_util_pct),
    },
    InsightRule {
        tag: HIGH_LATENCY,
        applies: |r, t| r.latency_ms.map_or(false, |l| l > t.high_latency_ms),
    },
    InsightRule {
        tag: HIGH_MEMORY,
        applies: |r, t| r.memory_mb.map_or(false, |m| m > t.high_memory_mb),
    },
    InsightRule {
        tag: FP16_SPEEDUP,
        applies: |r, t| match (r.latency_ms, r.fp32_latency) {
            (Some(latency), Some(fp32)) if r.is_precision("FP16") => {
                latency < t.fp16_latency_ratio * fp32
            }
            _ => false,
        },
    },
];

/// Produces one [`Insight`] per run, in input order
#[derive(Debug, Clone, Default)]
pub struct InsightReporter {
    thresholds: InsightThresholds,
}

impl InsightReporter {
    pub fn new(thresholds: InsightThresholds) -> Self {
        Self { thresholds }
    }

    /// Entries that are not objects still yield an insight, with every field absent
    pub fn report(&self, results: &[Value]) -> Vec<Insight> {
        results
            .iter()
            .map(|value| self.insight(&ProfileRecord::from_value(value).unwrap_or_default()))
            .collect()
    }

    pub fn report_records(&self, records: &[ProfileRecord]) -> Vec<Insight> {
        records.iter().map(|record| self.insight(record)).collect()
    }

    fn insight(&self, record: &ProfileRecord) -> Insight {
        let mut issues: Vec<String> = INSIGHT_RULES
            .iter()
            .filter(|rule| (rule.applies)(record, &self.thresholds))
            .map(|rule| rule.tag.to_string())
            .collect();

        if issues.is_empty() {
            issues.push(NO_MAJOR_BOTTLENECK.to_string());
        }

        Insight {
            runtime: record.runtime.clone(),
            precision: record.precision.clone(),
            batch: record.batch,
            issues,
        }
    }
}

/// Generate per-run insights with the default thresholds
pub fn generate_insights(results: &[Value]) -> Vec<Insight> {
    InsightReporter::default().report(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tags_in_rule_order() {
        let insights = generate_insights(&[json!({
            "runtime": "onnxruntime-gpu",
            "precision": "FP16",
            "batch": 1,
            "latency_ms": 60.0,
            "memory_mb": 900.0,
            "gpu_util": 35.0,
            "fp32_latency": 100.0
        })]);

        assert_eq!(insights.len(), 1);
        assert_eq!(
            insights[0].issues,
            vec![GPU_UNDERUTILIZED, HIGH_LATENCY, HIGH_MEMORY, FP16_SPEEDUP]
        );
        assert_eq!(insights[0].runtime.as_deref(), Some("onnxruntime-gpu"));
        assert_eq!(insights[0].batch, Some(1));
    }

    #[test]
    fn test_healthy_run_gets_placeholder() {
        let insights = generate_insights(&[json!({
            "precision": "FP32", "latency_ms": 5.0, "memory_mb": 100.0, "gpu_util": 95.0
        })]);
        assert_eq!(insights[0].issues, vec![NO_MAJOR_BOTTLENECK]);
    }

    #[test]
    fn test_fp16_needs_baseline() {
        let insights = generate_insights(&[json!({
            "precision": "FP16", "latency_ms": 5.0, "gpu_util": 95.0
        })]);
        assert_eq!(insights[0].issues, vec![NO_MAJOR_BOTTLENECK]);

        // 9.0 is not below 0.9 * 10.0
        let insights = generate_insights(&[json!({
            "precision": "FP16", "latency_ms": 9.0, "fp32_latency": 10.0, "gpu_util": 95.0
        })]);
        assert_eq!(insights[0].issues, vec![NO_MAJOR_BOTTLENECK]);
    }

    #[test]
    fn test_no_rows_dropped() {
        let input = vec![json!({}), json!(42), json!(null), json!({"latency_ms": "slow"})];
        let insights = generate_insights(&input);

        assert_eq!(insights.len(), input.len());
        for insight in &insights {
            assert_eq!(insight.issues, vec![NO_MAJOR_BOTTLENECK]);
            assert_eq!(insight.runtime, None);
        }
    }

    #[test]
    fn test_thresholds_differ_from_rule_engine() {
        // 35% GPU is fine for the rule engine (< 30) but tagged here (< 40)
        let insights = generate_insights(&[json!({"gpu_util": 35.0})]);
        assert_eq!(insights[0].issues, vec![GPU_UNDERUTILIZED]);
    }
}
