use serde::Serialize;
use serde_json::{Map, Value};

/// One benchmark observation.
///
/// Built leniently from a JSON object: absent or `null` keys become `None`,
/// and a value of the wrong type also becomes `None`. For the three core
/// metrics the offending key is remembered in `malformed_fields`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfileRecord {
    pub runtime: Option<String>,
    pub latency_ms: Option<f64>,
    pub memory_mb: Option<f64>,
    /// Percentage, 0-100
    pub gpu_util: Option<f64>,
    pub precision: Option<String>,
    pub batch: Option<i64>,
    pub speedup_over_fp32: Option<f64>,
    pub fp32_latency: Option<f64>,
    #[serde(skip)]
    pub malformed_fields: Vec<&'static str>,
}

const CORE_METRICS: [&str; 3] = ["latency_ms", "memory_mb", "gpu_util"];

impl ProfileRecord {
    /// Returns `None` when `value` is not a JSON object
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_object().map(Self::from_map)
    }

    pub fn from_map(map: &Map<String, Value>) -> Self {
        let mut malformed = Vec::new();

        let mut metric = |key: &'static str| match map.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => n.as_f64(),
            Some(_) => {
                malformed.push(key);
                None
            }
        };
        let latency_ms = metric(CORE_METRICS[0]);
        let memory_mb = metric(CORE_METRICS[1]);
        let gpu_util = metric(CORE_METRICS[2]);

        Self {
            runtime: text(map, "runtime"),
            latency_ms,
            memory_mb,
            gpu_util,
            precision: text(map, "precision"),
            batch: map.get("batch").and_then(integer),
            speedup_over_fp32: map.get("speedup_over_fp32").and_then(Value::as_f64),
            fp32_latency: map.get("fp32_latency").and_then(Value::as_f64),
            malformed_fields: malformed,
        }
    }

    /// False when any core metric was present with a non-numeric value
    pub fn is_well_formed(&self) -> bool {
        self.malformed_fields.is_empty()
    }

    pub fn is_precision(&self, tag: &str) -> bool {
        self.precision.as_deref() == Some(tag)
    }
}

fn text(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

// Integral floats such as 4.0 count as integers
fn integer(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}
