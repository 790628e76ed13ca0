//! Knowledge graph memory.
//!
//! Turns conversation text into a temporally-aware graph of entities and facts and
//! answers queries over it:
//! - `core`: configuration, errors, ids, nodes, links and the entity-type taxonomy
//! - `completion`: language model abstraction and Ollama implementation
//! - `embedding`: embedding model abstraction and Ollama implementation
//! - `ingest`: entity extraction, deduplication, summaries and relationship extraction
//! - `storage`: graph store trait and its `SQLite` backend
//! - `retrieval`: hybrid search, rank fusion and reranking
//! - `engine`: the `GraphMemory` facade
//! - `tools`: direct management surface for LLM tool callers

pub mod completion;
pub mod core;
pub mod embedding;
pub mod engine;
pub mod ingest;
pub mod retrieval;
pub mod storage;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

pub use completion::{CompletionFuture, LanguageModel, OllamaLanguageModel};
pub use core::{
    EntityType, EntityTypeRegistry, EpisodeId, GraphMemoryConfig, GroupId, LinkId,
    MemoryError, MemoryLink, MemoryObject, MemoryResult, ObjectId,
};
pub use embedding::{EmbedFuture, Embedder, OllamaEmbedder};
pub use engine::{GraphMemory, GraphMemoryParts};
pub use ingest::{ExtractedEdge, ExtractedEntity, MatchType, ResolvedEntity};
pub use retrieval::{
    HttpReranker, HybridSearchOutcome, HybridSearchRequest, HybridSearchResult, Reranker,
    SearchSource,
};
pub use storage::{
    DeleteOutcome, GraphConnection, GraphStore, ScoredObject, SqliteGraphStore,
    init_sqlite_vec_extension,
};
pub use tools::{MemoryTools, ToolDefinition, dispatch, tool_definitions};
