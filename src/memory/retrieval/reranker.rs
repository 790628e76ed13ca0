//! Cross-encoder reranking service client.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::memory::core::config::RerankerConfig;
use crate::memory::core::errors::{MemoryError, MemoryResult};

/// Boxed future type for reranker calls.
pub type RerankFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Relevance of one document, by position in the request.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct RerankScore {
    /// Index into the submitted documents.
    pub index: usize,
    /// Relevance; higher is better.
    #[serde(alias = "relevance_score")]
    pub score: f32,
}

/// Reorders candidate documents for a query.
pub trait Reranker: Send + Sync {
    /// Score `documents` against `query`, returning at most `top_n` entries, best first.
    ///
    /// # Errors
    /// Returns an error if the service call fails.
    fn rerank<'a>(
        &'a self,
        query: &'a str,
        documents: Vec<String>,
        top_n: usize,
    ) -> RerankFuture<'a, MemoryResult<Vec<RerankScore>>>;
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: Vec<String>,
    top_n: usize,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RerankResponse {
    Wrapped { results: Vec<RerankScore> },
    Bare(Vec<RerankScore>),
}

/// Reranker speaking the common `POST /rerank` JSON protocol.
#[derive(Clone)]
pub struct HttpReranker {
    client: reqwest::Client,
    endpoint: Url,
    model: String,
    api_key: Option<String>,
}

impl HttpReranker {
    /// Build a client from config. Returns `Ok(None)` when no endpoint is configured.
    ///
    /// # Errors
    /// Returns an error if the endpoint URL is invalid.
    pub fn from_config(config: &RerankerConfig) -> MemoryResult<Option<Self>> {
        let Some(endpoint) = &config.endpoint else {
            return Ok(None);
        };
        let base = Url::parse(endpoint)?;
        let endpoint = if base.path().trim_end_matches('/').ends_with("rerank") {
            base
        } else {
            base.join("rerank")?
        };

        Ok(Some(Self {
            client: reqwest::Client::new(),
            endpoint,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        }))
    }
}

impl Reranker for HttpReranker {
    fn rerank<'a>(
        &'a self,
        query: &'a str,
        documents: Vec<String>,
        top_n: usize,
    ) -> RerankFuture<'a, MemoryResult<Vec<RerankScore>>> {
        Box::pin(async move {
            let count = documents.len();
            let body = RerankRequest {
                model: &self.model,
                query,
                documents,
                top_n,
            };

            let mut request = self.client.post(self.endpoint.clone()).json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            let response: RerankResponse = request.send().await?.error_for_status()?.json().await?;
            let mut scores = match response {
                RerankResponse::Wrapped { results } | RerankResponse::Bare(results) => results,
            };

            if scores.iter().any(|s| s.index >= count) {
                return Err(MemoryError::InvalidGraphData(
                    "reranker returned an out-of-range index".to_string(),
                ));
            }

            scores.sort_by(|a, b| b.score.total_cmp(&a.score));
            scores.truncate(top_n);
            Ok(scores)
        })
    }
}
