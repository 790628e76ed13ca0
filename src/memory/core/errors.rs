//! Error types for the graph memory subsystem.

use thiserror::Error;

/// Graph memory error type.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A graph object or link failed validation.
    #[error("invalid graph data: {0}")]
    InvalidGraphData(String),
    /// The graph store is not configured or could not be reached.
    #[error("graph store unavailable: {0}")]
    GraphUnavailable(String),
    /// The language model returned nothing usable.
    #[error("language model error: {0}")]
    Model(String),
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// Embedding error.
    #[error("embedding error: {0}")]
    Embedding(#[from] rig::embeddings::EmbeddingError),
    /// HTTP client error from Rig.
    #[error("http client error: {0}")]
    HttpClient(#[from] rig::http_client::Error),
    /// Completion error.
    #[error("completion error: {0}")]
    Completion(#[from] rig::completion::CompletionError),
    /// Reranker transport error.
    #[error("reranker error: {0}")]
    Reranker(#[from] reqwest::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    /// Invalid regular expression.
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result alias for graph memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;
