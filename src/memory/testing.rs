//! Scripted collaborators for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::memory::completion::{CompletionFuture, LanguageModel};
use crate::memory::core::errors::{MemoryError, MemoryResult};
use crate::memory::core::ids::GroupId;
use crate::memory::embedding::{EmbedFuture, Embedder};
use crate::memory::ingest::dedupe::normalize_name;
use crate::memory::retrieval::reranker::{RerankFuture, RerankScore, Reranker};
use crate::memory::storage::graph_store::GraphStore;
use crate::memory::storage::sqlite_graph_store::SqliteGraphStore;

/// Embedding size used by test stores and embedders.
pub const TEST_DIMS: usize = 64;

/// Partition used by tests.
pub fn test_group() -> GroupId {
    GroupId::new("test-group").unwrap()
}

/// In-memory graph store with [`TEST_DIMS`] embeddings.
pub async fn memory_store() -> Arc<dyn GraphStore> {
    Arc::new(SqliteGraphStore::open_in_memory(TEST_DIMS).await.unwrap())
}

#[derive(Default)]
struct Script {
    responses: HashMap<String, VecDeque<String>>,
    prompts: HashMap<String, Vec<String>>,
}

/// Language model replaying queued responses per system preamble.
///
/// An empty queue answers `{}`.
#[derive(Default)]
pub struct ScriptedModel {
    script: Mutex<Script>,
    fail: bool,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// A model whose every call fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Queue a response for calls made with `system`.
    pub fn push(&self, system: &str, response: &str) {
        self.script
            .lock()
            .unwrap()
            .responses
            .entry(system.to_string())
            .or_default()
            .push_back(response.to_string());
    }

    /// Prompts sent with `system`, in call order.
    pub fn prompts(&self, system: &str) -> Vec<String> {
        self.script
            .lock()
            .unwrap()
            .prompts
            .get(system)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of calls made with `system`.
    pub fn calls(&self, system: &str) -> usize {
        self.prompts(system).len()
    }
}

impl LanguageModel for ScriptedModel {
    fn complete<'a>(
        &'a self,
        system: &'a str,
        prompt: &'a str,
    ) -> CompletionFuture<'a, MemoryResult<String>> {
        Box::pin(async move {
            let mut script = self.script.lock().unwrap();
            script
                .prompts
                .entry(system.to_string())
                .or_default()
                .push(prompt.to_string());
            if self.fail {
                return Err(MemoryError::Model("scripted failure".to_string()));
            }
            Ok(script
                .responses
                .get_mut(system)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| "{}".to_string()))
        })
    }
}

/// Deterministic bag-of-words embedder.
///
/// Each normalized token is hashed into one of `ndims` buckets; the result is
/// L2-normalized, so texts sharing words have positive cosine similarity.
pub struct HashEmbedder {
    ndims: usize,
    fail: bool,
}

impl HashEmbedder {
    pub const fn new(ndims: usize) -> Self {
        Self { ndims, fail: false }
    }

    pub const fn failing(ndims: usize) -> Self {
        Self { ndims, fail: true }
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.ndims];
        for token in normalize_name(text).split_whitespace() {
            let bucket = token
                .bytes()
                .fold(2_166_136_261_u32, |hash, b| (hash ^ u32::from(b)).wrapping_mul(16_777_619));
            vector[bucket as usize % self.ndims] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Embedder for HashEmbedder {
    fn embed_text(&self, text: &str) -> EmbedFuture<'_, MemoryResult<Vec<f32>>> {
        let result = if self.fail {
            Err(MemoryError::Model("scripted embedding failure".to_string()))
        } else {
            Ok(self.vector(text))
        };
        Box::pin(async move { result })
    }

    fn embed_texts(&self, texts: Vec<String>) -> EmbedFuture<'_, MemoryResult<Vec<Vec<f32>>>> {
        let result = if self.fail {
            Err(MemoryError::Model("scripted embedding failure".to_string()))
        } else {
            Ok(texts.iter().map(|t| self.vector(t)).collect())
        };
        Box::pin(async move { result })
    }

    fn ndims(&self) -> usize {
        self.ndims
    }
}

/// Reranker that reverses the candidate order and records every call.
#[derive(Default)]
pub struct FixedReranker {
    calls: Mutex<Vec<Vec<String>>>,
    fail: bool,
}

impl FixedReranker {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Documents received by each call.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

impl Reranker for FixedReranker {
    fn rerank<'a>(
        &'a self,
        _query: &'a str,
        documents: Vec<String>,
        top_n: usize,
    ) -> RerankFuture<'a, MemoryResult<Vec<RerankScore>>> {
        Box::pin(async move {
            let count = documents.len();
            self.calls.lock().unwrap().push(documents);
            if self.fail {
                return Err(MemoryError::Model("scripted rerank failure".to_string()));
            }
            Ok((0..count)
                .rev()
                .take(top_n)
                .map(|index| RerankScore {
                    index,
                    score: 1.0 / (1.0 + (count - index) as f32),
                })
                .collect())
        })
    }
}
