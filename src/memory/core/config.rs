//! Configuration for the graph memory subsystem.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::memory::core::errors::{MemoryError, MemoryResult};
use crate::memory::core::ids::GroupId;

/// Prefix of every environment variable read by [`GraphMemoryConfig::from_env`].
pub const ENV_PREFIX: &str = "GRAPH_MEMORY_";

/// Top-level configuration for the graph memory engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphMemoryConfig {
    /// Subsystem feature flag. When false nothing is wired up.
    pub enabled: bool,
    /// Partition used when a caller does not provide one.
    pub default_group_id: GroupId,
    /// Optional override for the entity-type taxonomy file.
    pub entity_types_path: Option<PathBuf>,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Embedding model settings.
    pub embedding: EmbeddingConfig,
    /// Completion model settings.
    pub llm: LlmConfig,
    /// Reranking service settings.
    pub reranker: RerankerConfig,
    /// Extraction pipeline settings.
    pub extraction: ExtractionConfig,
    /// Deduplication settings.
    pub dedupe: DedupeConfig,
    /// Hybrid retrieval settings.
    pub retrieval: RetrievalConfig,
    /// Vector index parameters.
    pub vector_index: VectorIndexConfig,
}

impl Default for GraphMemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_group_id: GroupId::default_partition(),
            entity_types_path: None,
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            reranker: RerankerConfig::default(),
            extraction: ExtractionConfig::default(),
            dedupe: DedupeConfig::default(),
            retrieval: RetrievalConfig::default(),
            vector_index: VectorIndexConfig::default(),
        }
    }
}

impl GraphMemoryConfig {
    /// Build a configuration from `GRAPH_MEMORY_*` environment variables on top of defaults.
    ///
    /// # Errors
    /// Returns an error if a variable cannot be parsed or the result fails validation.
    pub fn from_env() -> MemoryResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`], reading variables through `lookup`.
    ///
    /// # Errors
    /// Returns an error if a variable cannot be parsed or the result fails validation.
    pub fn from_lookup<F>(lookup: F) -> MemoryResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();

        if let Some(v) = var("ENABLED") {
            config.enabled = parse_bool("ENABLED", &v)?;
        }
        if let Some(v) = var("GROUP_ID") {
            config.default_group_id = GroupId::new(&v)
                .map_err(|e| MemoryError::InvalidConfig(format!("GROUP_ID: {e}")))?;
        }
        if let Some(v) = var("ENTITY_TYPES_PATH") {
            config.entity_types_path = Some(PathBuf::from(v));
        }
        if let Some(v) = var("SQLITE_PATH") {
            config.storage.sqlite_path = PathBuf::from(v);
        }
        if let Some(v) = var("OLLAMA_URL") {
            config.embedding.base_url = Some(v.clone());
            config.llm.base_url = Some(v);
        }
        if let Some(v) = var("EMBEDDING_MODEL") {
            config.embedding.model = v;
        }
        if let Some(v) = var("EMBEDDING_NDIMS") {
            config.embedding.ndims = parse_num("EMBEDDING_NDIMS", &v)?;
        }
        if let Some(v) = var("LLM_MODEL") {
            config.llm.model = v;
        }
        if let Some(v) = var("LLM_TEMPERATURE") {
            config.llm.temperature = parse_num("LLM_TEMPERATURE", &v)?;
        }
        if let Some(v) = var("RERANKER_URL") {
            config.reranker.endpoint = Some(v);
        }
        if let Some(v) = var("RERANKER_MODEL") {
            config.reranker.model = v;
        }
        if let Some(v) = var("RERANKER_API_KEY") {
            config.reranker.api_key = Some(v);
        }
        if let Some(v) = var("FUZZY_THRESHOLD") {
            config.dedupe.fuzzy_threshold = parse_num("FUZZY_THRESHOLD", &v)?;
        }
        if let Some(v) = var("SUMMARY_CONCURRENCY") {
            config.extraction.summary_concurrency = parse_num("SUMMARY_CONCURRENCY", &v)?;
        }
        if let Some(v) = var("MIN_VECTOR_SCORE") {
            config.retrieval.min_vector_score = parse_num("MIN_VECTOR_SCORE", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> MemoryResult<()> {
        if self.embedding.ndims == 0 {
            return Err(MemoryError::InvalidConfig(
                "embedding.ndims must be > 0".to_string(),
            ));
        }

        if self.storage.table_prefix.is_empty()
            || !self
                .storage
                .table_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(MemoryError::InvalidConfig(
                "storage.table_prefix must be non-empty [A-Za-z0-9_]".to_string(),
            ));
        }

        if self.extraction.summary_max_chars == 0 {
            return Err(MemoryError::InvalidConfig(
                "extraction.summary_max_chars must be > 0".to_string(),
            ));
        }

        if self.extraction.summary_concurrency == 0 {
            return Err(MemoryError::InvalidConfig(
                "extraction.summary_concurrency must be > 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.dedupe.fuzzy_threshold) {
            return Err(MemoryError::InvalidConfig(
                "dedupe.fuzzy_threshold must be within [0, 1]".to_string(),
            ));
        }

        if self.dedupe.candidate_limit == 0 {
            return Err(MemoryError::InvalidConfig(
                "dedupe.candidate_limit must be > 0".to_string(),
            ));
        }

        if !(-1.0..=1.0).contains(&self.retrieval.min_vector_score) {
            return Err(MemoryError::InvalidConfig(
                "retrieval.min_vector_score must be within [-1, 1]".to_string(),
            ));
        }

        if self.retrieval.max_hops == 0 || self.retrieval.max_hops > 2 {
            return Err(MemoryError::InvalidConfig(
                "retrieval.max_hops must be 1 or 2".to_string(),
            ));
        }

        if self.retrieval.rerank_overfetch_factor == 0 {
            return Err(MemoryError::InvalidConfig(
                "retrieval.rerank_overfetch_factor must be > 0".to_string(),
            ));
        }

        if self.vector_index.m == 0 || self.vector_index.ef_construction == 0 {
            return Err(MemoryError::InvalidConfig(
                "vector_index.m and ef_construction must be > 0".to_string(),
            ));
        }

        for base_url in [
            &self.embedding.base_url,
            &self.llm.base_url,
            &self.reranker.endpoint,
        ]
        .into_iter()
        .flatten()
        {
            Url::parse(base_url)?;
        }

        Ok(())
    }
}

fn parse_bool(name: &str, raw: &str) -> MemoryResult<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(MemoryError::InvalidConfig(format!(
            "{ENV_PREFIX}{name}: expected a boolean, got '{raw}'"
        ))),
    }
}

fn parse_num<T: FromStr>(name: &str, raw: &str) -> MemoryResult<T> {
    raw.parse().map_err(|_| {
        MemoryError::InvalidConfig(format!("{ENV_PREFIX}{name}: cannot parse '{raw}'"))
    })
}

/// Storage configuration for graph data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
    /// Prefix applied to every table name.
    pub table_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("graph_memory.sqlite"),
            table_prefix: "memory".to_string(),
        }
    }
}

/// Embedding model settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Ollama embedding model name.
    pub model: String,
    /// Embedding vector dimensions.
    pub ndims: usize,
    /// Optional custom base URL.
    pub base_url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "qwen3-embedding:8b".to_string(),
            ndims: 3072,
            base_url: None,
        }
    }
}

/// Completion model settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Ollama completion model name.
    pub model: String,
    /// Temperature for generation.
    pub temperature: f64,
    /// Optional max tokens.
    pub max_tokens: Option<u64>,
    /// Optional custom base URL.
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "ministral-3:8b-instruct-2512-q8_0".to_string(),
            temperature: 0.0,
            max_tokens: None,
            base_url: None,
        }
    }
}

/// Reranking service settings. No endpoint means no reranker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RerankerConfig {
    /// Base URL of a `/rerank` compatible service.
    pub endpoint: Option<String>,
    /// Model name sent with each request.
    pub model: String,
    /// Optional bearer token.
    pub api_key: Option<String>,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: "bge-reranker-v2-m3".to_string(),
            api_key: None,
        }
    }
}

/// Extraction pipeline settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Extra "what did you miss?" passes after the first extraction.
    pub max_reflexion_iterations: usize,
    /// Maximum summary length in characters.
    pub summary_max_chars: usize,
    /// Concurrent summary requests per batch.
    pub summary_concurrency: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_reflexion_iterations: 2,
            summary_max_chars: 250,
            summary_concurrency: 4,
        }
    }
}

/// Deduplication settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DedupeConfig {
    /// Jaro-Winkler similarity required for a fuzzy match.
    pub fuzzy_threshold: f64,
    /// Maximum candidates fetched per extracted name.
    pub candidate_limit: usize,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.92,
            candidate_limit: 10,
        }
    }
}

/// Hybrid retrieval settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Minimum cosine similarity kept by the vector branch.
    pub min_vector_score: f32,
    /// Reciprocal rank fusion constant.
    pub rrf_k: f32,
    /// Weight of the fulltext list in fusion.
    pub lexical_weight: f32,
    /// Weight of the vector list in fusion.
    pub vector_weight: f32,
    /// Weight of the traversal list in fusion.
    pub graph_weight: f32,
    /// Candidate multiplier when reranking.
    pub rerank_overfetch_factor: usize,
    /// Candidate floor when reranking.
    pub rerank_overfetch_min: usize,
    /// Traversal depth (1 or 2).
    pub max_hops: usize,
    /// LRU capacity for query embeddings; 0 disables the cache.
    pub query_cache_capacity: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            min_vector_score: 0.5,
            rrf_k: 60.0,
            lexical_weight: 1.0,
            vector_weight: 1.0,
            graph_weight: 0.5,
            rerank_overfetch_factor: 5,
            rerank_overfetch_min: 50,
            max_hops: 2,
            query_cache_capacity: 256,
        }
    }
}

/// Distance metric of the vector index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorMetric {
    /// Cosine distance.
    Cosine,
}

/// Vector index parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VectorIndexConfig {
    /// Distance metric.
    pub metric: VectorMetric,
    /// HNSW graph degree.
    pub m: usize,
    /// HNSW build-time candidate list size.
    pub ef_construction: usize,
    /// Query through the index (true) or scan every embedding (false).
    pub use_index: bool,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            metric: VectorMetric::Cosine,
            m: 32,
            ef_construction: 200,
            use_index: true,
        }
    }
}
