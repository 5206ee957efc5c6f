pub mod model_loader;
pub mod graph_builder;

// Re-export key types from the parser module
pub use model_loader::OnnxModelLoader;
pub use graph_builder::GraphBuilder;
