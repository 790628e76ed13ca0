//! Core graph memory types and identifiers.

pub mod config;
pub mod entity_types;
pub mod errors;
pub mod ids;
pub mod link;
pub mod object;
pub mod time;

pub use config::{
    DedupeConfig, EmbeddingConfig, ExtractionConfig, GraphMemoryConfig, LlmConfig,
    RerankerConfig, RetrievalConfig, StorageConfig, VectorIndexConfig, VectorMetric,
};
pub use entity_types::{EntityType, EntityTypeRegistry};
pub use errors::{MemoryError, MemoryResult};
pub use ids::{EpisodeId, GroupId, GroupIdError, LinkId, ObjectId};
pub use link::MemoryLink;
pub use object::{MAX_SUMMARY_CHARS, MemoryObject};
