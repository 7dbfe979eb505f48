pub mod model_loader;
pub mod model_writer;
pub mod schema_validator;

// Re-export key types from the parser module
pub use model_loader::OnnxModelLoader;
pub use model_writer::OnnxModelWriter;
pub use schema_validator::SchemaValidator;
