//! Retrieval, fusion and reranking for graph memory search.

pub mod hybrid_search;
pub mod ranking;
pub mod reranker;

pub use hybrid_search::{
    HybridSearchOutcome, HybridSearchRequest, HybridSearchResult, HybridSearcher,
    candidate_pool_size,
};
pub use ranking::{FusedObject, RankedList, SearchSource, reciprocal_rank_fusion};
pub use reranker::{HttpReranker, RerankFuture, RerankScore, Reranker};
