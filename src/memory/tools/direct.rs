//! Direct memory management, bypassing extraction.
//!
//! Every operation returns a human-readable status line for an LLM tool caller.
//! Store failures are logged and rendered, never returned as errors.

use std::fmt::Write;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::memory::core::entity_types::EntityTypeRegistry;
use crate::memory::core::errors::MemoryResult;
use crate::memory::core::ids::{GroupId, ObjectId};
use crate::memory::core::link::MemoryLink;
use crate::memory::core::object::{MAX_SUMMARY_CHARS, MemoryObject};
use crate::memory::embedding::embedder::Embedder;
use crate::memory::ingest::dedupe::normalize_name;
use crate::memory::ingest::summarizer::truncate_summary;
use crate::memory::storage::graph_store::{DeleteOutcome, GraphConnection, GraphStore};

/// Agent-facing CRUD over single nodes and facts.
#[derive(Clone)]
pub struct MemoryTools {
    graph: GraphConnection,
    embedder: Arc<dyn Embedder>,
    entity_types: Arc<EntityTypeRegistry>,
}

impl MemoryTools {
    /// Create the tool surface.
    #[must_use]
    pub fn new(
        graph: GraphConnection,
        embedder: Arc<dyn Embedder>,
        entity_types: Arc<EntityTypeRegistry>,
    ) -> Self {
        Self {
            graph,
            embedder,
            entity_types,
        }
    }

    fn store(&self) -> Result<&Arc<dyn GraphStore>, String> {
        self.graph
            .require()
            .map_err(|err| format!("Knowledge graph is unavailable: {err}"))
    }

    /// Merge two nodes and one fact `from -[relation]-> to`.
    ///
    /// `summary` is the fact text; it defaults to `"{from} {relation} {to}"`.
    pub async fn add_fact_directly(
        &self,
        group: &GroupId,
        from: &str,
        relation: &str,
        to: &str,
        summary: Option<&str>,
    ) -> String {
        let (from, relation, to) = (from.trim(), relation.trim(), to.trim());
        if from.is_empty() || relation.is_empty() || to.is_empty() {
            return "Cannot add fact: 'from', 'relation' and 'to' must not be empty.".to_string();
        }
        if normalize_name(from) == normalize_name(to) {
            return format!("Cannot add fact: '{from}' and '{to}' name the same entity.");
        }
        let store = match self.store() {
            Ok(store) => store,
            Err(status) => return status,
        };

        match self.add_fact(store.as_ref(), group, from, relation, to, summary).await {
            Ok(true) => {
                info!(%from, %relation, %to, "Fact added directly");
                format!("Added fact: {from} -[{relation}]-> {to}")
            }
            Ok(false) => format!("Fact already known, updated: {from} -[{relation}]-> {to}"),
            Err(err) => {
                error!(%err, "Direct fact write failed");
                format!("Failed to add fact {from} -[{relation}]-> {to}: {err}")
            }
        }
    }

    async fn add_fact(
        &self,
        store: &dyn GraphStore,
        group: &GroupId,
        from: &str,
        relation: &str,
        to: &str,
        summary: Option<&str>,
    ) -> MemoryResult<bool> {
        let source = self.find_or_create(store, group, from).await?;
        let target = self.find_or_create(store, group, to).await?;

        let description = summary
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map_or_else(|| format!("{from} {relation} {to}"), ToString::to_string);
        let mut link = MemoryLink::new(group.clone(), source.uuid, target.uuid, relation, &description)?
            .with_validity(Some(Utc::now()), None);
        link.description_embedding = self.embed(&description).await;

        let current = store
            .find_current_link(group, source.uuid, relation, target.uuid)
            .await?;
        let is_new = current.is_none();
        if let Some(current) = current {
            link.uuid = current.uuid;
            link.created_at = current.created_at;
            link.valid_at = current.valid_at;
        }

        store.upsert_graph(group, &[source, target], &[link]).await?;
        Ok(is_new)
    }

    async fn find_or_create(
        &self,
        store: &dyn GraphStore,
        group: &GroupId,
        name: &str,
    ) -> MemoryResult<MemoryObject> {
        if let Some(existing) = store.find_object_by_name(group, name).await? {
            return Ok(existing);
        }
        let mut object = MemoryObject::new(group.clone(), name)?;
        object.embedding = self.embed(name).await;
        Ok(object)
    }

    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        match self.embedder.embed_text(text).await {
            Ok(embedding) => Some(embedding),
            Err(err) => {
                warn!(%err, "Embedding failed; writing without embedding");
                None
            }
        }
    }

    /// A node and its current incoming and outgoing facts, as text.
    pub async fn get_entity_details(&self, group: &GroupId, name: &str) -> String {
        let store = match self.store() {
            Ok(store) => store,
            Err(status) => return status,
        };
        match Self::render_details(store.as_ref(), group, name.trim()).await {
            Ok(Some(details)) => details,
            Ok(None) => not_found(name),
            Err(err) => {
                error!(%err, "Entity lookup failed");
                format!("Failed to read entity '{}': {err}", name.trim())
            }
        }
    }

    async fn render_details(
        store: &dyn GraphStore,
        group: &GroupId,
        name: &str,
    ) -> MemoryResult<Option<String>> {
        let Some(object) = store.find_object_by_name(group, name).await? else {
            return Ok(None);
        };
        let links = store.links_for(group, object.uuid, true).await?;

        let mut out = String::new();
        let _ = writeln!(out, "Entity: {}", object.name);
        if !object.labels.is_empty() {
            let _ = writeln!(out, "Type: {}", object.labels.join(", "));
        }
        if !object.summary.is_empty() {
            let _ = writeln!(out, "Summary: {}", object.summary);
        }

        let mut outgoing = Vec::new();
        let mut incoming = Vec::new();
        for link in &links {
            if link.source_node_uuid == object.uuid {
                let other = endpoint_name(store, group, link.target_node_uuid).await?;
                outgoing.push(format!("- {} -> {other}: {}", link.relation_type, link.description));
            } else {
                let other = endpoint_name(store, group, link.source_node_uuid).await?;
                incoming.push(format!("- {other} -> {}: {}", link.relation_type, link.description));
            }
        }

        out.push_str("Outgoing relationships:\n");
        if outgoing.is_empty() {
            out.push_str("- (none)\n");
        }
        for line in outgoing {
            let _ = writeln!(out, "{line}");
        }
        out.push_str("Incoming relationships:\n");
        if incoming.is_empty() {
            out.push_str("- (none)\n");
        }
        for line in incoming {
            let _ = writeln!(out, "{line}");
        }

        Ok(Some(out.trim_end().to_string()))
    }

    /// Mark the first current `from -[relation]-> to` fact as no longer true.
    ///
    /// History is kept: the link stays with `invalid_at` set.
    pub async fn invalidate_fact(&self, group: &GroupId, from: &str, relation: &str, to: &str) -> String {
        let (from, relation, to) = (from.trim(), relation.trim(), to.trim());
        let store = match self.store() {
            Ok(store) => store,
            Err(status) => return status,
        };

        match Self::invalidate(store.as_ref(), group, from, relation, to).await {
            Ok(true) => {
                info!(%from, %relation, %to, "Fact invalidated");
                format!("Invalidated fact: {from} -[{relation}]-> {to}. History is preserved.")
            }
            Ok(false) => format!("No current fact {from} -[{relation}]-> {to} found."),
            Err(err) => {
                error!(%err, "Fact invalidation failed");
                format!("Failed to invalidate fact {from} -[{relation}]-> {to}: {err}")
            }
        }
    }

    async fn invalidate(
        store: &dyn GraphStore,
        group: &GroupId,
        from: &str,
        relation: &str,
        to: &str,
    ) -> MemoryResult<bool> {
        let (Some(source), Some(target)) = (
            store.find_object_by_name(group, from).await?,
            store.find_object_by_name(group, to).await?,
        ) else {
            return Ok(false);
        };
        let Some(link) = store
            .find_current_link(group, source.uuid, relation, target.uuid)
            .await?
        else {
            return Ok(false);
        };
        store.invalidate_link(group, link.uuid, Utc::now()).await
    }

    /// Replace a node's summary and/or add a type label.
    pub async fn update_entity(
        &self,
        group: &GroupId,
        name: &str,
        summary: Option<&str>,
        entity_type: Option<&str>,
    ) -> String {
        let name = name.trim();
        let summary = summary.map(str::trim).filter(|s| !s.is_empty());
        let entity_type = entity_type.map(str::trim).filter(|s| !s.is_empty());
        if summary.is_none() && entity_type.is_none() {
            return format!("Nothing to update for '{name}': give a summary or a type.");
        }

        let label = match entity_type {
            Some(requested) => match self.entity_types.find_by_name(requested) {
                Some(found) => Some(found.name.clone()),
                None => {
                    let known: Vec<&str> = self
                        .entity_types
                        .types()
                        .iter()
                        .map(|t| t.name.as_str())
                        .collect();
                    return format!(
                        "Unknown entity type '{requested}'. Known types: {}.",
                        known.join(", ")
                    );
                }
            },
            None => None,
        };

        let store = match self.store() {
            Ok(store) => store,
            Err(status) => return status,
        };

        let result = Self::update(store.as_ref(), group, name, summary, label).await;
        match result {
            Ok(Some(object)) => {
                info!(name = %object.name, "Entity updated");
                format!("Updated entity '{}'.", object.name)
            }
            Ok(None) => not_found(name),
            Err(err) => {
                error!(%err, "Entity update failed");
                format!("Failed to update entity '{name}': {err}")
            }
        }
    }

    async fn update(
        store: &dyn GraphStore,
        group: &GroupId,
        name: &str,
        summary: Option<&str>,
        label: Option<String>,
    ) -> MemoryResult<Option<MemoryObject>> {
        let Some(mut object) = store.find_object_by_name(group, name).await? else {
            return Ok(None);
        };
        if let Some(summary) = summary {
            object.summary = truncate_summary(summary, MAX_SUMMARY_CHARS);
        }
        if let Some(label) = label
            && !object.labels.contains(&label)
        {
            object.labels.insert(0, label);
        }
        store
            .upsert_graph(group, std::slice::from_ref(&object), &[])
            .await?;
        Ok(Some(object))
    }

    /// Permanently remove a node; with `cascade`, also every link touching it.
    ///
    /// Irreversible. Use [`Self::invalidate_fact`] to retire a fact while keeping history.
    pub async fn hard_delete_entity(&self, group: &GroupId, name: &str, cascade: bool) -> String {
        let name = name.trim();
        let store = match self.store() {
            Ok(store) => store,
            Err(status) => return status,
        };

        let object = match store.find_object_by_name(group, name).await {
            Ok(Some(object)) => object,
            Ok(None) => return not_found(name),
            Err(err) => {
                error!(%err, "Entity lookup failed");
                return format!("Failed to delete entity '{name}': {err}");
            }
        };

        match store.delete_object(group, object.uuid, cascade).await {
            Ok(DeleteOutcome::Deleted { links_removed }) => {
                warn!(name = %object.name, links_removed, "Entity permanently deleted");
                format!(
                    "Permanently deleted entity '{}' and {links_removed} relationships. This cannot be undone.",
                    object.name
                )
            }
            Ok(DeleteOutcome::HasLinks { links }) => format!(
                "Entity '{}' still has {links} relationships; delete with cascade to remove them too, \
                 or invalidate the facts instead.",
                object.name
            ),
            Ok(DeleteOutcome::NotFound) => not_found(name),
            Err(err) => {
                error!(%err, "Entity deletion failed");
                format!("Failed to delete entity '{name}': {err}")
            }
        }
    }
}

fn not_found(name: &str) -> String {
    format!("Entity '{}' not found in the knowledge graph.", name.trim())
}

async fn endpoint_name(
    store: &dyn GraphStore,
    group: &GroupId,
    uuid: ObjectId,
) -> MemoryResult<String> {
    Ok(store
        .get_object(group, uuid)
        .await?
        .map_or_else(|| uuid.to_string(), |o| o.name))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::memory::core::config::RetrievalConfig;
    use crate::memory::retrieval::hybrid_search::{HybridSearchRequest, HybridSearcher};
    use crate::memory::testing::{HashEmbedder, TEST_DIMS, memory_store, test_group};

    async fn tools() -> (MemoryTools, Arc<dyn GraphStore>) {
        let store = memory_store().await;
        let tools = MemoryTools::new(
            GraphConnection::connected(store.clone()),
            Arc::new(HashEmbedder::new(TEST_DIMS)),
            Arc::new(EntityTypeRegistry::builtin().unwrap()),
        );
        (tools, store)
    }

    #[tokio::test]
    async fn add_then_details() {
        let (tools, _) = tools().await;
        let group = test_group();
        let status = tools.add_fact_directly(&group, "A", "uses", "B", None).await;
        assert_eq!(status, "Added fact: A -[uses]-> B");

        let details = tools.get_entity_details(&group, "A").await;
        assert!(details.contains("Entity: A"));
        assert!(details.contains("uses -> B"));
        let incoming = tools.get_entity_details(&group, "b").await;
        assert!(incoming.contains("A -> uses"));
    }

    #[tokio::test]
    async fn adding_twice_merges() {
        let (tools, store) = tools().await;
        let group = test_group();
        tools.add_fact_directly(&group, "A", "uses", "B", Some("A uses B daily")).await;
        let status = tools.add_fact_directly(&group, "A", "uses", "B", None).await;
        assert!(status.starts_with("Fact already known"));
        let counts = store.counts(&group).await.unwrap();
        assert_eq!((counts.objects, counts.links), (2, 1));
    }

    #[tokio::test]
    async fn invalidation_hides_current_fact_but_keeps_history() {
        let (tools, store) = tools().await;
        let group = test_group();
        tools.add_fact_directly(&group, "A", "uses", "B", None).await;

        let status = tools.invalidate_fact(&group, "A", "uses", "B").await;
        assert!(status.starts_with("Invalidated fact"));
        assert!(!tools.get_entity_details(&group, "A").await.contains("uses -> B"));

        let a = store.find_object_by_name(&group, "A").await.unwrap().unwrap();
        let all = store.links_for(&group, a.uuid, false).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].invalid_at.is_some());

        let again = tools.invalidate_fact(&group, "A", "uses", "B").await;
        assert!(again.starts_with("No current fact"));
    }

    #[tokio::test]
    async fn point_in_time_search_still_sees_invalidated_fact() {
        let (tools, store) = tools().await;
        let group = test_group();
        tools.add_fact_directly(&group, "Alice", "uses", "Rust", None).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let mid = Utc::now();
        tokio::time::sleep(Duration::from_millis(5)).await;
        tools.invalidate_fact(&group, "Alice", "uses", "Rust").await;

        let searcher = HybridSearcher::new(
            GraphConnection::connected(store.clone()),
            Arc::new(HashEmbedder::new(TEST_DIMS)),
            None,
            RetrievalConfig::default(),
        );
        let rust = store.find_object_by_name(&group, "Rust").await.unwrap().unwrap();

        let mut request = HybridSearchRequest::new("Alice", 10);
        request.as_of = Some(mid);
        let before = searcher.search_detailed(&group, &request).await;
        assert!(before.graph.iter().any(|r| r.uuid == rust.uuid));

        request.as_of = Some(Utc::now());
        let now = searcher.search_detailed(&group, &request).await;
        assert!(now.graph.iter().all(|r| r.uuid != rust.uuid));
    }

    #[tokio::test]
    async fn fact_about_itself_is_refused() {
        let (tools, store) = tools().await;
        let group = test_group();
        let status = tools.add_fact_directly(&group, "Alice", "knows", "alice", None).await;
        assert_eq!(status, "Cannot add fact: 'Alice' and 'alice' name the same entity.");
        let counts = store.counts(&group).await.unwrap();
        assert_eq!((counts.objects, counts.links), (0, 0));
    }

    #[tokio::test]
    async fn update_entity_validates_type() {
        let (tools, _) = tools().await;
        let group = test_group();
        tools.add_fact_directly(&group, "Alice", "knows", "Bob", None).await;

        let bad = tools.update_entity(&group, "Alice", None, Some("Spaceship")).await;
        assert!(bad.starts_with("Unknown entity type"));

        let ok = tools
            .update_entity(&group, "alice", Some("Alice is a pilot."), Some("person"))
            .await;
        assert_eq!(ok, "Updated entity 'Alice'.");
        let details = tools.get_entity_details(&group, "Alice").await;
        assert!(details.contains("Type: Person"));
        assert!(details.contains("Summary: Alice is a pilot."));

        let missing = tools.update_entity(&group, "Nobody", Some("x"), None).await;
        assert!(missing.contains("not found"));
    }

    #[tokio::test]
    async fn hard_delete_respects_cascade() {
        let (tools, store) = tools().await;
        let group = test_group();
        tools.add_fact_directly(&group, "X", "owns", "Y", None).await;

        let refused = tools.hard_delete_entity(&group, "X", false).await;
        assert!(refused.contains("still has 1 relationships"));

        let deleted = tools.hard_delete_entity(&group, "X", true).await;
        assert!(deleted.starts_with("Permanently deleted entity 'X' and 1 relationships"));
        assert!(tools.get_entity_details(&group, "X").await.contains("not found"));
        assert_eq!(store.counts(&group).await.unwrap().links, 0);
    }

    #[tokio::test]
    async fn unavailable_graph_is_reported() {
        let tools = MemoryTools::new(
            GraphConnection::unavailable("not configured"),
            Arc::new(HashEmbedder::new(TEST_DIMS)),
            Arc::new(EntityTypeRegistry::builtin().unwrap()),
        );
        let status = tools.get_entity_details(&test_group(), "A").await;
        assert!(status.starts_with("Knowledge graph is unavailable"));
    }
}
