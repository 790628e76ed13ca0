//! Language model abstraction used by the extraction pipeline.

pub mod model;

pub use model::{CompletionFuture, LanguageModel, OllamaLanguageModel};
