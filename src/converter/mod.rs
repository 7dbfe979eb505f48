pub mod backend;
pub mod exporter;
pub mod pipeline;
pub mod shape;
pub mod validator;

pub use backend::{
    preference_order, Backend, BackendPolicy, BackendSelector, InferenceRuntime, ReferenceRuntime,
    ReferenceSession, SessionSelection,
};
pub use exporter::{ExportOptions, ExportSummary, Exporter, Trace, TraceableModel};
pub use pipeline::{ConversionPipeline, ConversionResult, LoadedConversion};
pub use shape::InputShape;
pub use validator::{ModelValidator, ValidationOutcome, ValidationPolicy};
