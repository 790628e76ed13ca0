//! Hybrid search over the knowledge graph.
//!
//! Three independent branches run concurrently:
//! - **Fulltext**: FTS index over node names.
//! - **Vector**: cosine similarity over name embeddings, indexed or exhaustive.
//! - **Graph**: 1-2 hop neighbourhood of nodes named in the query, optionally as of a
//!   point in time.
//!
//! Branch failures become empty contributions. The union is deduplicated by uuid and
//! ordered with Reciprocal Rank Fusion (RRF), then either truncated or reranked.

use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::memory::core::config::RetrievalConfig;
use crate::memory::core::errors::MemoryResult;
use crate::memory::core::ids::{GroupId, ObjectId};
use crate::memory::embedding::embedder::Embedder;
use crate::memory::retrieval::ranking::{
    FusedObject, RankedList, SearchSource, reciprocal_rank_fusion,
};
use crate::memory::retrieval::reranker::Reranker;
use crate::memory::storage::graph_store::{GraphConnection, GraphStore, ScoredObject};

/// Parameters of one hybrid search.
#[derive(Clone, Debug)]
pub struct HybridSearchRequest {
    /// Query text.
    pub query: String,
    /// Maximum number of results.
    pub limit: usize,
    /// Rerank the fused candidates.
    pub use_reranking: bool,
    /// Use the vector index instead of an exhaustive scan.
    pub use_vector_index: bool,
    /// Point in time for the traversal branch.
    pub as_of: Option<DateTime<Utc>>,
}

impl HybridSearchRequest {
    /// Request with indexed vector search and no reranking.
    #[must_use]
    pub fn new(query: impl Into<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            limit,
            use_reranking: false,
            use_vector_index: true,
            as_of: None,
        }
    }
}

/// One hybrid search hit.
#[derive(Clone, Debug, Serialize)]
pub struct HybridSearchResult {
    /// Node id.
    pub uuid: ObjectId,
    /// Node name.
    pub name: String,
    /// Node summary.
    pub summary: String,
    /// Fused RRF score.
    pub score: f32,
    /// Reranker score, when reranked.
    pub rerank_score: Option<f32>,
    /// Branches that returned the node.
    pub sources: Vec<SearchSource>,
}

impl From<FusedObject> for HybridSearchResult {
    fn from(value: FusedObject) -> Self {
        Self {
            uuid: value.uuid,
            name: value.name,
            summary: value.summary,
            score: value.score,
            rerank_score: None,
            sources: value.sources,
        }
    }
}

/// Results plus the raw branch outputs they were built from.
#[derive(Clone, Debug, Default)]
pub struct HybridSearchOutcome {
    /// Final results, at most `limit`.
    pub results: Vec<HybridSearchResult>,
    /// Candidates requested from each branch.
    pub pool_size: usize,
    /// Fulltext branch output.
    pub fulltext: Vec<ScoredObject>,
    /// Vector branch output.
    pub vector: Vec<ScoredObject>,
    /// Traversal branch output.
    pub graph: Vec<ScoredObject>,
    /// Whether the reranker ordered the results.
    pub reranked: bool,
}

/// Candidates each branch is asked for.
///
/// Reranking over-fetches `max(limit * factor, floor)`.
#[must_use]
pub fn candidate_pool_size(limit: usize, use_reranking: bool, config: &RetrievalConfig) -> usize {
    if use_reranking {
        limit
            .saturating_mul(config.rerank_overfetch_factor)
            .max(config.rerank_overfetch_min)
    } else {
        limit
    }
}

/// Hybrid searcher over a graph connection.
pub struct HybridSearcher {
    graph: GraphConnection,
    embedder: Arc<dyn Embedder>,
    reranker: Option<Arc<dyn Reranker>>,
    config: RetrievalConfig,
    query_cache: Option<Mutex<LruCache<String, Vec<f32>>>>,
}

impl HybridSearcher {
    /// Create a new hybrid searcher.
    #[must_use]
    pub fn new(
        graph: GraphConnection,
        embedder: Arc<dyn Embedder>,
        reranker: Option<Arc<dyn Reranker>>,
        config: RetrievalConfig,
    ) -> Self {
        let query_cache =
            NonZeroUsize::new(config.query_cache_capacity).map(|cap| Mutex::new(LruCache::new(cap)));
        Self {
            graph,
            embedder,
            reranker,
            config,
            query_cache,
        }
    }

    /// Run a hybrid search and return the final results.
    pub async fn search(&self, group: &GroupId, request: &HybridSearchRequest) -> Vec<HybridSearchResult> {
        self.search_detailed(group, request).await.results
    }

    /// Run a hybrid search and keep the branch outputs.
    pub async fn search_detailed(
        &self,
        group: &GroupId,
        request: &HybridSearchRequest,
    ) -> HybridSearchOutcome {
        let query = request.query.trim();
        if query.is_empty() || request.limit == 0 {
            return HybridSearchOutcome::default();
        }

        let store = match &self.graph {
            GraphConnection::Connected(store) => store.as_ref(),
            GraphConnection::Unavailable { reason } => {
                warn!(%reason, "Hybrid search skipped: graph store unavailable");
                return HybridSearchOutcome::default();
            }
        };

        let pool_size = candidate_pool_size(request.limit, request.use_reranking, &self.config);
        debug!(query, pool_size, "Hybrid search");

        let (fulltext, vector, graph) = tokio::join!(
            self.fulltext_branch(store, group, query, pool_size),
            self.vector_branch(store, group, query, pool_size, request.use_vector_index),
            self.graph_branch(store, group, query, pool_size, request.as_of),
        );

        let fused = reciprocal_rank_fusion(
            &[
                RankedList {
                    source: SearchSource::Fulltext,
                    weight: self.config.lexical_weight,
                    results: &fulltext,
                },
                RankedList {
                    source: SearchSource::Vector,
                    weight: self.config.vector_weight,
                    results: &vector,
                },
                RankedList {
                    source: SearchSource::Graph,
                    weight: self.config.graph_weight,
                    results: &graph,
                },
            ],
            self.config.rrf_k,
        );

        let (results, reranked) = if request.use_reranking {
            self.rerank(query, fused, request.limit).await
        } else {
            (truncate(fused, request.limit), false)
        };

        HybridSearchOutcome {
            results,
            pool_size,
            fulltext,
            vector,
            graph,
            reranked,
        }
    }

    async fn fulltext_branch(
        &self,
        store: &dyn GraphStore,
        group: &GroupId,
        query: &str,
        limit: usize,
    ) -> Vec<ScoredObject> {
        store
            .fulltext_search(group, query, limit)
            .await
            .unwrap_or_else(|err| {
                warn!(%err, "Fulltext search failed");
                Vec::new()
            })
    }

    async fn vector_branch(
        &self,
        store: &dyn GraphStore,
        group: &GroupId,
        query: &str,
        limit: usize,
        use_index: bool,
    ) -> Vec<ScoredObject> {
        let embedding = match self.query_embedding(query).await {
            Ok(embedding) => embedding,
            Err(err) => {
                warn!(%err, "Query embedding failed");
                return Vec::new();
            }
        };

        store
            .vector_search(group, &embedding, limit, self.config.min_vector_score, use_index)
            .await
            .unwrap_or_else(|err| {
                warn!(%err, "Vector search failed");
                Vec::new()
            })
    }

    async fn graph_branch(
        &self,
        store: &dyn GraphStore,
        group: &GroupId,
        query: &str,
        limit: usize,
        as_of: Option<DateTime<Utc>>,
    ) -> Vec<ScoredObject> {
        store
            .traverse(group, query, self.config.max_hops, as_of, limit)
            .await
            .unwrap_or_else(|err| {
                warn!(%err, "Graph traversal failed");
                Vec::new()
            })
    }

    async fn query_embedding(&self, query: &str) -> MemoryResult<Vec<f32>> {
        if let Some(cache) = &self.query_cache
            && let Some(hit) = cache.lock().await.get(query)
        {
            return Ok(hit.clone());
        }

        let embedding = self.embedder.embed_text(query).await?;
        if let Some(cache) = &self.query_cache {
            cache.lock().await.put(query.to_string(), embedding.clone());
        }
        Ok(embedding)
    }

    async fn rerank(
        &self,
        query: &str,
        fused: Vec<FusedObject>,
        limit: usize,
    ) -> (Vec<HybridSearchResult>, bool) {
        let Some(reranker) = &self.reranker else {
            debug!("Reranking requested but no reranker configured; using fused order");
            return (truncate(fused, limit), false);
        };
        if fused.is_empty() {
            return (Vec::new(), false);
        }

        let documents: Vec<String> = fused
            .iter()
            .map(|candidate| format!("{}: {}", candidate.name, candidate.summary))
            .collect();

        match reranker.rerank(query, documents, limit).await {
            Ok(scores) => {
                let mut slots: Vec<Option<FusedObject>> = fused.into_iter().map(Some).collect();
                let results = scores
                    .into_iter()
                    .filter_map(|score| {
                        let candidate = slots.get_mut(score.index)?.take()?;
                        let mut result = HybridSearchResult::from(candidate);
                        result.rerank_score = Some(score.score);
                        Some(result)
                    })
                    .take(limit)
                    .collect();
                (results, true)
            }
            Err(err) => {
                warn!(%err, "Reranking failed; using fused order");
                (truncate(fused, limit), false)
            }
        }
    }
}

fn truncate(fused: Vec<FusedObject>, limit: usize) -> Vec<HybridSearchResult> {
    fused
        .into_iter()
        .take(limit)
        .map(HybridSearchResult::from)
        .collect()
}
