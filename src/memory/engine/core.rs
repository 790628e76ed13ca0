//! Graph memory orchestration.
//!
//! [`GraphMemory`] wires the extraction pipeline (entities, deduplication, summaries,
//! relationships, persistence) and the hybrid searcher over one graph connection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::memory::completion::{LanguageModel, OllamaLanguageModel};
use crate::memory::core::config::GraphMemoryConfig;
use crate::memory::core::entity_types::EntityTypeRegistry;
use crate::memory::core::errors::MemoryResult;
use crate::memory::core::ids::{EpisodeId, GroupId, ObjectId};
use crate::memory::core::link::MemoryLink;
use crate::memory::core::object::MemoryObject;
use crate::memory::embedding::embedder::{Embedder, OllamaEmbedder};
use crate::memory::ingest::entity_extractor::EntityExtractor;
use crate::memory::ingest::entity_resolution::{EntityResolver, ResolvedEntity};
use crate::memory::ingest::relation_extractor::{ExtractedEdge, RelationExtractor};
use crate::memory::ingest::summarizer::Summarizer;
use crate::memory::retrieval::hybrid_search::{
    HybridSearchOutcome, HybridSearchRequest, HybridSearchResult, HybridSearcher,
};
use crate::memory::retrieval::reranker::{HttpReranker, Reranker};
use crate::memory::storage::graph_store::{GraphConnection, GraphStore};
use crate::memory::storage::sqlite_graph_store::SqliteGraphStore;
use crate::memory::tools::direct::MemoryTools;

/// Collaborators the graph memory runs on.
pub struct GraphMemoryParts {
    /// Graph store connection state.
    pub graph: GraphConnection,
    /// Completion model for extraction.
    pub model: Arc<dyn LanguageModel>,
    /// Embedding model for names, facts and queries.
    pub embedder: Arc<dyn Embedder>,
    /// Optional reranking service.
    pub reranker: Option<Arc<dyn Reranker>>,
    /// Entity-type taxonomy.
    pub entity_types: Arc<EntityTypeRegistry>,
}

impl GraphMemoryParts {
    /// Build the default collaborators: `SQLite` graph store, Ollama models, HTTP reranker.
    ///
    /// A store that fails to open is recorded as unavailable rather than returned as an
    /// error.
    ///
    /// # Errors
    /// Returns an error if the taxonomy or a model client cannot be built.
    pub async fn from_config(config: &GraphMemoryConfig) -> MemoryResult<Self> {
        let entity_types = Arc::new(EntityTypeRegistry::load(config.entity_types_path.as_deref())?);
        let model: Arc<dyn LanguageModel> = Arc::new(OllamaLanguageModel::new(&config.llm)?);
        let embedder: Arc<dyn Embedder> = Arc::new(OllamaEmbedder::new(&config.embedding)?);
        let reranker = HttpReranker::from_config(&config.reranker)?
            .map(|r| Arc::new(r) as Arc<dyn Reranker>);

        let graph = match SqliteGraphStore::open(config).await {
            Ok(store) => GraphConnection::connected(Arc::new(store)),
            Err(err) => {
                warn!(%err, "Graph store unavailable");
                GraphConnection::unavailable(err.to_string())
            }
        };

        Ok(Self {
            graph,
            model,
            embedder,
            reranker,
            entity_types,
        })
    }
}

/// Knowledge graph memory facade.
pub struct GraphMemory {
    config: GraphMemoryConfig,
    graph: GraphConnection,
    embedder: Arc<dyn Embedder>,
    extractor: EntityExtractor,
    resolver: EntityResolver,
    summarizer: Summarizer,
    relations: RelationExtractor,
    searcher: HybridSearcher,
    tools: MemoryTools,
}

impl GraphMemory {
    /// Wire a graph memory from explicit collaborators.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(config: GraphMemoryConfig, parts: GraphMemoryParts) -> MemoryResult<Self> {
        config.validate()?;

        let extractor = EntityExtractor::new(parts.model.clone(), parts.entity_types.clone())
            .with_max_reflexion_iterations(config.extraction.max_reflexion_iterations);
        let resolver = EntityResolver::new(
            parts.model.clone(),
            parts.entity_types.clone(),
            config.dedupe.clone(),
        );
        let summarizer = Summarizer::new(
            parts.model.clone(),
            config.extraction.summary_max_chars,
            config.extraction.summary_concurrency,
        );
        let relations = RelationExtractor::new(parts.model)?;
        let searcher = HybridSearcher::new(
            parts.graph.clone(),
            parts.embedder.clone(),
            parts.reranker,
            config.retrieval.clone(),
        );
        let tools = MemoryTools::new(parts.graph.clone(), parts.embedder.clone(), parts.entity_types);

        Ok(Self {
            config,
            graph: parts.graph,
            embedder: parts.embedder,
            extractor,
            resolver,
            summarizer,
            relations,
            searcher,
            tools,
        })
    }

    /// Build from config with the default collaborators.
    ///
    /// Returns `Ok(None)` when the subsystem is disabled.
    ///
    /// # Errors
    /// Returns an error if the configuration or a collaborator is invalid.
    pub async fn from_config(config: GraphMemoryConfig) -> MemoryResult<Option<Self>> {
        if !config.enabled {
            info!("Graph memory disabled");
            return Ok(None);
        }
        config.validate()?;
        let parts = GraphMemoryParts::from_config(&config).await?;
        Self::new(config, parts).map(Some)
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &GraphMemoryConfig {
        &self.config
    }

    /// Graph connection state.
    #[must_use]
    pub const fn graph(&self) -> &GraphConnection {
        &self.graph
    }

    /// Embedding model.
    #[must_use]
    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Direct management tools over the same graph.
    #[must_use]
    pub const fn tools(&self) -> &MemoryTools {
        &self.tools
    }

    /// Partition used when callers do not name one.
    #[must_use]
    pub const fn default_group(&self) -> &GroupId {
        &self.config.default_group_id
    }

    /// Run the extraction pipeline on `content` and persist the result.
    ///
    /// Model and embedding failures degrade to less data. An unavailable store yields a
    /// status string.
    ///
    /// # Errors
    /// Returns an error only if the graph write fails.
    pub async fn extract_and_save_to_graph(
        &self,
        group: &GroupId,
        content: &str,
        context: &str,
    ) -> MemoryResult<String> {
        let store = match &self.graph {
            GraphConnection::Connected(store) => store.clone(),
            GraphConnection::Unavailable { reason } => {
                info!(%reason, "Extraction skipped: graph store unavailable");
                return Ok(format!(
                    "Knowledge graph is unavailable ({reason}); nothing was saved."
                ));
            }
        };

        let episode = EpisodeId::new();
        let entities = self.extractor.extract(content, context).await;
        if entities.is_empty() {
            info!(%episode, "No entities extracted");
            return Ok("No entities found; nothing was added to the knowledge graph.".to_string());
        }

        let resolved = self
            .resolver
            .resolve(&self.graph, group, &entities, content)
            .await;
        let summaries = self
            .summarizer
            .summarize_all(&resolved, content, context)
            .await;
        let objects = self.build_objects(group, &resolved, &summaries).await?;

        let names: Vec<String> = resolved.iter().map(|r| r.name.clone()).collect();
        let edges = self
            .relations
            .extract(content, context, &names, Utc::now())
            .await;
        let links = self
            .build_links(store.as_ref(), group, episode, &resolved, edges)
            .await?;

        if let Err(err) = store.upsert_graph(group, &objects, &links).await {
            error!(%err, %episode, "Failed to persist extraction");
            return Err(err);
        }

        info!(
            %episode,
            entities = objects.len(),
            relationships = links.len(),
            "Extraction persisted"
        );
        Ok(format!(
            "Added {} entities and {} relationships to the knowledge graph",
            objects.len(),
            links.len()
        ))
    }

    /// Hybrid search in `group`.
    pub async fn hybrid_search(
        &self,
        group: &GroupId,
        request: &HybridSearchRequest,
    ) -> Vec<HybridSearchResult> {
        self.searcher.search(group, request).await
    }

    /// Hybrid search keeping the per-branch outputs.
    pub async fn hybrid_search_detailed(
        &self,
        group: &GroupId,
        request: &HybridSearchRequest,
    ) -> HybridSearchOutcome {
        self.searcher.search_detailed(group, request).await
    }

    /// A search request using the configured vector-index preference.
    #[must_use]
    pub fn search_request(&self, query: impl Into<String>, limit: usize) -> HybridSearchRequest {
        let mut request = HybridSearchRequest::new(query, limit);
        request.use_vector_index = self.config.vector_index.use_index;
        request
    }

    /// One node per distinct uuid, in first-seen order.
    async fn build_objects(
        &self,
        group: &GroupId,
        resolved: &[ResolvedEntity],
        summaries: &[String],
    ) -> MemoryResult<Vec<MemoryObject>> {
        let mut objects: Vec<MemoryObject> = Vec::new();
        let mut positions: HashMap<ObjectId, usize> = HashMap::new();

        for (entity, summary) in resolved.iter().zip(summaries) {
            let pos = match positions.get(&entity.uuid) {
                Some(&pos) => pos,
                None => {
                    let object = match &entity.existing {
                        Some(existing) => existing.clone(),
                        None => MemoryObject::with_id(entity.uuid, group.clone(), &entity.name)?,
                    };
                    objects.push(object);
                    positions.insert(entity.uuid, objects.len() - 1);
                    objects.len() - 1
                }
            };
            let object = &mut objects[pos];
            if !object.labels.contains(&entity.label) {
                object.labels.push(entity.label.clone());
            }
            if !summary.is_empty() {
                object.summary.clone_from(summary);
            }
        }

        let names: Vec<String> = objects.iter().map(|o| o.name.clone()).collect();
        match self.embedder.embed_texts(names).await {
            Ok(embeddings) if embeddings.len() == objects.len() => {
                for (object, embedding) in objects.iter_mut().zip(embeddings) {
                    object.embedding = Some(embedding);
                }
            }
            Ok(embeddings) => warn!(
                expected = objects.len(),
                got = embeddings.len(),
                "Embedding count mismatch; keeping stored name embeddings"
            ),
            Err(err) => warn!(%err, "Name embedding failed; keeping stored name embeddings"),
        }

        Ok(objects)
    }

    /// Links for the extracted edges, reusing current links with the same triple.
    async fn build_links(
        &self,
        store: &dyn GraphStore,
        group: &GroupId,
        episode: EpisodeId,
        resolved: &[ResolvedEntity],
        edges: Vec<ExtractedEdge>,
    ) -> MemoryResult<Vec<MemoryLink>> {
        if edges.is_empty() {
            return Ok(Vec::new());
        }

        let facts: Vec<String> = edges.iter().map(|e| e.fact.clone()).collect();
        let fact_embeddings: Vec<Option<Vec<f32>>> = match self.embedder.embed_texts(facts).await {
            Ok(embeddings) if embeddings.len() == edges.len() => {
                embeddings.into_iter().map(Some).collect()
            }
            Ok(_) => {
                warn!("Fact embedding count mismatch; storing facts without embeddings");
                vec![None; edges.len()]
            }
            Err(err) => {
                warn!(%err, "Fact embedding failed; storing facts without embeddings");
                vec![None; edges.len()]
            }
        };

        let mut links: Vec<MemoryLink> = Vec::new();
        let mut seen: HashSet<(ObjectId, String, ObjectId)> = HashSet::new();

        for (edge, embedding) in edges.into_iter().zip(fact_embeddings) {
            let source = resolved[edge.source_index].uuid;
            let target = resolved[edge.target_index].uuid;
            if source == target {
                debug!(fact = %edge.fact, "Dropping edge between two mentions of one entity");
                continue;
            }
            if !seen.insert((source, edge.relation_type.clone(), target)) {
                continue;
            }

            let current = match store
                .find_current_link(group, source, &edge.relation_type, target)
                .await
            {
                Ok(current) => current,
                Err(err) => {
                    warn!(%err, "Current link lookup failed; writing a new link");
                    None
                }
            };

            let valid_at = edge
                .valid_at
                .or_else(|| current.as_ref().and_then(|c| c.valid_at));
            let mut invalid_at = edge.invalid_at;
            if let (Some(valid), Some(invalid)) = (valid_at, invalid_at)
                && invalid < valid
            {
                warn!(fact = %edge.fact, "invalid_at precedes the stored valid_at; dropping invalid_at");
                invalid_at = None;
            }

            let mut link = MemoryLink::new(group.clone(), source, target, edge.relation_type, edge.fact)?
                .with_validity(valid_at, invalid_at)
                .with_source(episode);
            link.description_embedding = embedding;
            if let Some(current) = current {
                link.uuid = current.uuid;
                link.created_at = current.created_at;
            }
            links.push(link);
        }

        Ok(links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ingest::entity_resolution::MatchType;
    use crate::memory::ingest::prompts;
    use crate::memory::testing::{
        HashEmbedder, ScriptedModel, TEST_DIMS, memory_store, test_group,
    };

    const ENTITIES: &str = r#"{"extracted_entities": [
        {"name": "Alice", "entity_type_id": 1},
        {"name": "Acme Corp", "entity_type_id": 2}
    ]}"#;
    const EDGES: &str = r#"{"edges": [{"source_entity_id": 1, "target_entity_id": 2,
        "relation_type": "WORKS_AT", "fact": "Alice works at Acme Corp",
        "valid_at": "2024-01-01T00:00:00Z", "invalid_at": null}]}"#;

    fn config() -> GraphMemoryConfig {
        let mut config = GraphMemoryConfig::default();
        config.embedding.ndims = TEST_DIMS;
        config
    }

    async fn memory(model: Arc<ScriptedModel>) -> (GraphMemory, Arc<dyn GraphStore>) {
        let store = memory_store().await;
        let parts = GraphMemoryParts {
            graph: GraphConnection::connected(store.clone()),
            model,
            embedder: Arc::new(HashEmbedder::new(TEST_DIMS)),
            reranker: None,
            entity_types: Arc::new(EntityTypeRegistry::builtin().unwrap()),
        };
        (GraphMemory::new(config(), parts).unwrap(), store)
    }

    fn script_batch(model: &ScriptedModel, summary_a: &str, summary_b: &str) {
        model.push(prompts::EXTRACT_ENTITIES_SYSTEM, ENTITIES);
        model.push(prompts::REFLEXION_SYSTEM, r#"{"missed_entities": []}"#);
        model.push(prompts::SUMMARY_SYSTEM, summary_a);
        model.push(prompts::SUMMARY_SYSTEM, summary_b);
        model.push(prompts::EXTRACT_EDGES_SYSTEM, EDGES);
    }

    #[tokio::test]
    async fn two_entities_and_one_relation() {
        let model = Arc::new(ScriptedModel::new());
        script_batch(&model, r#"{"summary": "Alice is an engineer."}"#, r#"{"summary": "Acme Corp is a company."}"#);
        let (memory, store) = memory(model).await;
        let group = test_group();

        let status = memory
            .extract_and_save_to_graph(&group, "Alice works at Acme Corp.", "")
            .await
            .unwrap();

        assert!(status.starts_with("Added 2 entities and 1 relationships"));
        let counts = store.counts(&group).await.unwrap();
        assert_eq!((counts.objects, counts.links), (2, 1));
    }

    #[tokio::test]
    async fn reprocessing_is_idempotent_and_updates_summary() {
        let model = Arc::new(ScriptedModel::new());
        script_batch(&model, r#"{"summary": "Alice is an engineer."}"#, r#"{"summary": "A company."}"#);
        script_batch(
            &model,
            r#"{"summary": "Alice is a senior engineer at Acme."}"#,
            r#"{"summary": "A company."}"#,
        );
        let (memory, store) = memory(model.clone()).await;
        let group = test_group();

        memory
            .extract_and_save_to_graph(&group, "Alice works at Acme Corp.", "")
            .await
            .unwrap();
        let first = store.find_object_by_name(&group, "Alice").await.unwrap().unwrap();

        memory
            .extract_and_save_to_graph(&group, "Alice works at Acme Corp. She is senior.", "")
            .await
            .unwrap();

        let counts = store.counts(&group).await.unwrap();
        assert_eq!((counts.objects, counts.links), (2, 1));
        let second = store.find_object_by_name(&group, "Alice").await.unwrap().unwrap();
        assert_eq!(first.uuid, second.uuid);
        assert_eq!(second.summary, "Alice is a senior engineer at Acme.");
        assert_eq!(model.calls(prompts::DEDUPE_SYSTEM), 0);

        let links = store.links_for(&group, second.uuid, false).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].sources.len(), 2);
    }

    #[tokio::test]
    async fn reextracted_edge_keeps_a_consistent_validity_window() {
        let model = Arc::new(ScriptedModel::new());
        script_batch(&model, "{}", "{}");
        model.push(prompts::EXTRACT_ENTITIES_SYSTEM, ENTITIES);
        model.push(prompts::REFLEXION_SYSTEM, r#"{"missed_entities": []}"#);
        model.push(
            prompts::EXTRACT_EDGES_SYSTEM,
            r#"{"edges": [{"source_entity_id": 1, "target_entity_id": 2,
                "relation_type": "WORKS_AT", "fact": "Alice works at Acme Corp",
                "valid_at": null, "invalid_at": "2023-01-01T00:00:00Z"}]}"#,
        );
        let (memory, store) = memory(model).await;
        let group = test_group();

        for _ in 0..2 {
            memory
                .extract_and_save_to_graph(&group, "Alice works at Acme Corp.", "")
                .await
                .unwrap();
        }

        let alice = store.find_object_by_name(&group, "Alice").await.unwrap().unwrap();
        let links = store.links_for(&group, alice.uuid, false).await.unwrap();
        assert_eq!(links.len(), 1);
        let start = crate::memory::core::time::parse_timestamp("2024-01-01T00:00:00Z");
        assert_eq!(links[0].valid_at, start);
        assert_eq!(links[0].invalid_at, None);
    }

    #[tokio::test]
    async fn exact_rematch_is_reported_as_exact() {
        let model = Arc::new(ScriptedModel::new());
        script_batch(&model, "{}", "{}");
        let (memory, store) = memory(model.clone()).await;
        let group = test_group();
        memory
            .extract_and_save_to_graph(&group, "Alice works at Acme Corp.", "")
            .await
            .unwrap();

        let resolved = memory
            .resolver
            .resolve(
                memory.graph(),
                &group,
                &[crate::memory::ingest::ExtractedEntity {
                    name: "alice".to_string(),
                    entity_type_id: 1,
                }],
                "alice",
            )
            .await;
        let alice = store.find_object_by_name(&group, "Alice").await.unwrap().unwrap();
        assert_eq!(resolved[0].uuid, alice.uuid);
        assert_eq!(resolved[0].match_type, Some(MatchType::Exact));
    }

    #[tokio::test]
    async fn no_entities_writes_nothing() {
        let model = Arc::new(ScriptedModel::new());
        let (memory, store) = memory(model).await;
        let status = memory
            .extract_and_save_to_graph(&test_group(), "hmm", "")
            .await
            .unwrap();
        assert!(status.contains("No entities"));
        assert_eq!(store.counts(&test_group()).await.unwrap().objects, 0);
    }

    #[tokio::test]
    async fn unavailable_store_returns_status() {
        let model = Arc::new(ScriptedModel::new());
        let parts = GraphMemoryParts {
            graph: GraphConnection::unavailable("not configured"),
            model: model.clone(),
            embedder: Arc::new(HashEmbedder::new(TEST_DIMS)),
            reranker: None,
            entity_types: Arc::new(EntityTypeRegistry::builtin().unwrap()),
        };
        let memory = GraphMemory::new(config(), parts).unwrap();
        let status = memory
            .extract_and_save_to_graph(&test_group(), "Alice works at Acme.", "")
            .await
            .unwrap();
        assert!(status.contains("unavailable"));
        assert_eq!(model.calls(prompts::EXTRACT_ENTITIES_SYSTEM), 0);
    }

    #[tokio::test]
    async fn disabled_config_wires_nothing() {
        let mut config = config();
        config.enabled = false;
        assert!(GraphMemory::from_config(config).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn embedding_failure_still_persists() {
        let model = Arc::new(ScriptedModel::new());
        script_batch(&model, "{}", "{}");
        let parts = GraphMemoryParts {
            graph: GraphConnection::connected(memory_store().await),
            model,
            embedder: Arc::new(HashEmbedder::failing(TEST_DIMS)),
            reranker: None,
            entity_types: Arc::new(EntityTypeRegistry::builtin().unwrap()),
        };
        let memory = GraphMemory::new(config(), parts).unwrap();
        let status = memory
            .extract_and_save_to_graph(&test_group(), "Alice works at Acme Corp.", "")
            .await
            .unwrap();
        assert!(status.starts_with("Added 2 entities and 1 relationships"));
    }
}
