pub mod analysis;
pub mod config;
pub mod converter;
pub mod error;
pub mod model;
pub mod nn;
pub mod parser;
pub mod proto;

// Re-export commonly used types
pub use analysis::{
    analyze_bottleneck, generate_insights, Bottleneck, BottleneckAnalyzer, Finding, Insight,
    InsightReporter, ProfileRecord,
};
pub use config::{AnalyzerConfig, ProfilerConfig};
pub use converter::{
    Backend, BackendSelector, ConversionPipeline, ConversionResult, InferenceRuntime, InputShape,
    ReferenceRuntime, TraceableModel,
};
pub use error::{Error, Result};
pub use model::{Dimension, Graph, Node, OnnxModel, Tensor, TensorInfo};
pub use parser::{OnnxModelLoader, OnnxModelWriter, SchemaValidator};
