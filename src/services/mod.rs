pub mod code_synthesizer;
pub mod dataset;
pub mod intent_resolver;
pub mod llm_service;
pub mod metric_catalogue;
pub mod pipeline;
pub mod result_normalizer;
pub mod sandbox; // Sandboxed routine execution on DataFusion

pub use code_synthesizer::*;
pub use dataset::*;
pub use intent_resolver::*;
pub use llm_service::*;
pub use pipeline::*;
pub use result_normalizer::*;
