//! Resolution of extracted entities against existing graph nodes.
//!
//! A deterministic pass (exact normalized name, then Jaro-Winkler above a threshold)
//! runs first. Only what it leaves unresolved is shown to the model. Anything still
//! unresolved gets a fresh uuid.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::memory::completion::LanguageModel;
use crate::memory::core::config::DedupeConfig;
use crate::memory::core::entity_types::EntityTypeRegistry;
use crate::memory::core::ids::{GroupId, ObjectId};
use crate::memory::core::object::MemoryObject;
use crate::memory::ingest::dedupe::{name_similarity, normalize_name};
use crate::memory::ingest::entity_extractor::ExtractedEntity;
use crate::memory::ingest::json_output::parse_model_json;
use crate::memory::ingest::prompts::{self, DedupeCandidate, DedupeEntity};
use crate::memory::storage::graph_store::GraphConnection;

/// How an extracted entity was matched to an existing node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchType {
    /// Equal normalized names.
    Exact,
    /// Name similarity at or above the threshold.
    Fuzzy,
    /// Model judged them the same entity.
    Llm,
}

/// Mapping of one extracted entity onto an existing node.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupMatch {
    /// Index into the extracted list.
    pub extracted_index: usize,
    /// Matched node.
    pub candidate_uuid: ObjectId,
    /// Which pass produced the match.
    pub match_type: MatchType,
    /// Name similarity between the two names, `1.0` for exact matches.
    pub confidence: f64,
}

/// An extracted entity with its final uuid.
#[derive(Debug, Clone)]
pub struct ResolvedEntity {
    /// Index into the extracted list.
    pub index: usize,
    /// Extracted name.
    pub name: String,
    /// Taxonomy id from extraction.
    pub entity_type_id: i64,
    /// Label for `entity_type_id`.
    pub label: String,
    /// Existing node uuid, or a fresh one.
    pub uuid: ObjectId,
    /// The matched node, when there was one.
    pub existing: Option<MemoryObject>,
    /// How the match was made; `None` for new entities.
    pub match_type: Option<MatchType>,
}

impl ResolvedEntity {
    /// Whether this entity maps onto an existing node.
    #[must_use]
    pub const fn is_existing(&self) -> bool {
        self.existing.is_some()
    }
}

#[derive(Debug, Default, Deserialize)]
struct Resolutions {
    #[serde(default)]
    entity_resolutions: Vec<Resolution>,
}

#[derive(Debug, Deserialize)]
struct Resolution {
    id: i64,
    #[serde(default = "no_duplicate")]
    duplicate_idx: i64,
}

const fn no_duplicate() -> i64 {
    -1
}

/// Deterministic pass: one slot per extracted entity.
///
/// Exact normalized matches win over fuzzy ones; among fuzzy matches the most similar
/// candidate wins.
#[must_use]
pub fn deterministic_matches(
    extracted: &[ExtractedEntity],
    candidates: &[MemoryObject],
    fuzzy_threshold: f64,
) -> Vec<Option<DedupMatch>> {
    let candidate_keys: Vec<String> = candidates.iter().map(|c| normalize_name(&c.name)).collect();

    extracted
        .iter()
        .enumerate()
        .map(|(index, entity)| {
            let key = normalize_name(&entity.name);
            if key.is_empty() {
                return None;
            }

            if let Some(pos) = candidate_keys.iter().position(|k| *k == key) {
                return Some(DedupMatch {
                    extracted_index: index,
                    candidate_uuid: candidates[pos].uuid,
                    match_type: MatchType::Exact,
                    confidence: 1.0,
                });
            }

            candidate_keys
                .iter()
                .enumerate()
                .map(|(pos, k)| (pos, name_similarity(&key, k)))
                .filter(|(_, score)| *score >= fuzzy_threshold)
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(pos, score)| DedupMatch {
                    extracted_index: index,
                    candidate_uuid: candidates[pos].uuid,
                    match_type: MatchType::Fuzzy,
                    confidence: score,
                })
        })
        .collect()
}

/// Resolves extracted entities to node uuids.
#[derive(Clone)]
pub struct EntityResolver {
    model: Arc<dyn LanguageModel>,
    types: Arc<EntityTypeRegistry>,
    config: DedupeConfig,
}

impl EntityResolver {
    /// Create a resolver.
    #[must_use]
    pub fn new(
        model: Arc<dyn LanguageModel>,
        types: Arc<EntityTypeRegistry>,
        config: DedupeConfig,
    ) -> Self {
        Self {
            model,
            types,
            config,
        }
    }

    /// Resolve every extracted entity, in order.
    ///
    /// Never fails: without a store, or when the candidate lookup fails, every entity
    /// is new. Entities with the same normalized name share one uuid.
    pub async fn resolve(
        &self,
        graph: &GraphConnection,
        group: &GroupId,
        extracted: &[ExtractedEntity],
        content: &str,
    ) -> Vec<ResolvedEntity> {
        if extracted.is_empty() {
            return Vec::new();
        }

        let candidates = match graph.store() {
            Some(store) => {
                let names: Vec<String> = extracted.iter().map(|e| e.name.clone()).collect();
                match store
                    .find_candidates(group, &names, self.config.candidate_limit)
                    .await
                {
                    Ok(candidates) => candidates,
                    Err(err) => {
                        warn!(%err, "Candidate lookup failed; treating all entities as new");
                        Vec::new()
                    }
                }
            }
            None => {
                info!("Graph store unavailable; treating all entities as new");
                Vec::new()
            }
        };

        let mut matches = deterministic_matches(extracted, &candidates, self.config.fuzzy_threshold);
        let unresolved: Vec<usize> = matches
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.is_none().then_some(i))
            .collect();
        debug!(
            extracted = extracted.len(),
            candidates = candidates.len(),
            unresolved = unresolved.len(),
            "Deterministic dedupe pass done"
        );

        if !unresolved.is_empty() && !candidates.is_empty() {
            for found in self
                .llm_matches(extracted, &unresolved, &candidates, content)
                .await
            {
                let slot = found.extracted_index;
                matches[slot] = Some(found);
            }
        }

        self.assign(extracted, &matches, &candidates)
    }

    async fn llm_matches(
        &self,
        extracted: &[ExtractedEntity],
        unresolved: &[usize],
        candidates: &[MemoryObject],
        content: &str,
    ) -> Vec<DedupMatch> {
        let entities: Vec<DedupeEntity<'_>> = unresolved
            .iter()
            .map(|&i| DedupeEntity {
                id: i,
                name: &extracted[i].name,
                entity_type: self.types.name_for(extracted[i].entity_type_id),
            })
            .collect();
        let shown: Vec<DedupeCandidate<'_>> = candidates
            .iter()
            .enumerate()
            .map(|(idx, c)| DedupeCandidate {
                idx,
                name: &c.name,
                entity_types: &c.labels,
                summary: &c.summary,
            })
            .collect();

        let prompt = prompts::dedupe_entities(content, &entities, &shown);
        let raw = match self.model.complete(prompts::DEDUPE_SYSTEM, &prompt).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(%err, "Dedupe call failed; unresolved entities are new");
                return Vec::new();
            }
        };
        let parsed: Resolutions = match parse_model_json(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(%err, "Unusable dedupe output; unresolved entities are new");
                return Vec::new();
            }
        };

        let allowed: HashSet<usize> = unresolved.iter().copied().collect();
        let mut out: Vec<DedupMatch> = Vec::new();
        for resolution in parsed.entity_resolutions {
            let Some(id) = usize::try_from(resolution.id).ok().filter(|id| allowed.contains(id))
            else {
                warn!(id = resolution.id, "Dedupe resolution for unknown entity id dropped");
                continue;
            };
            if resolution.duplicate_idx == -1 {
                continue;
            }
            let Some(candidate) = usize::try_from(resolution.duplicate_idx)
                .ok()
                .and_then(|idx| candidates.get(idx))
            else {
                warn!(
                    id,
                    duplicate_idx = resolution.duplicate_idx,
                    "Dedupe resolution with out-of-range duplicate_idx dropped"
                );
                continue;
            };
            if out.iter().any(|m| m.extracted_index == id) {
                continue;
            }
            out.push(DedupMatch {
                extracted_index: id,
                candidate_uuid: candidate.uuid,
                match_type: MatchType::Llm,
                confidence: name_similarity(&extracted[id].name, &candidate.name),
            });
        }
        out
    }

    fn assign(
        &self,
        extracted: &[ExtractedEntity],
        matches: &[Option<DedupMatch>],
        candidates: &[MemoryObject],
    ) -> Vec<ResolvedEntity> {
        // First match wins for every normalized name in the batch.
        let mut by_key: HashMap<String, (ObjectId, Option<MatchType>)> = HashMap::new();
        for (entity, found) in extracted.iter().zip(matches) {
            if let Some(found) = found {
                by_key
                    .entry(normalize_name(&entity.name))
                    .or_insert((found.candidate_uuid, Some(found.match_type)));
            }
        }

        extracted
            .iter()
            .enumerate()
            .map(|(index, entity)| {
                let key = normalize_name(&entity.name);
                let (uuid, match_type) = *by_key.entry(key).or_insert_with(|| {
                    if matches[index].is_none() {
                        debug!(name = %entity.name, "No match; new entity");
                    }
                    (ObjectId::new(), None)
                });
                ResolvedEntity {
                    index,
                    name: entity.name.clone(),
                    entity_type_id: entity.entity_type_id,
                    label: self.types.name_for(entity.entity_type_id).to_string(),
                    uuid,
                    existing: candidates.iter().find(|c| c.uuid == uuid).cloned(),
                    match_type,
                }
            })
            .collect()
    }
}
