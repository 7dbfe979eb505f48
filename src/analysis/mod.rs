// Analysis module
//
// Turns already-measured benchmark numbers into readable diagnostics: a
// ranked list of bottleneck findings, or a list of issue tags per run.

pub mod insights;
pub mod io;
pub mod record;
pub mod rules;

pub use insights::{generate_insights, Insight, InsightReporter, InsightThresholds};
pub use io::{load_records, read_records_csv, read_records_json};
pub use record::ProfileRecord;
pub use rules::{analyze_bottleneck, Bottleneck, BottleneckAnalyzer, BottleneckThresholds, Finding};
