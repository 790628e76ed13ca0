//! Model-driven relationship extraction between the entities of one batch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::memory::completion::LanguageModel;
use crate::memory::core::errors::MemoryResult;
use crate::memory::core::time::{parse_timestamp, to_storage};
use crate::memory::ingest::json_output::parse_or_default;
use crate::memory::ingest::prompts;

/// A validated fact between two entities of the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedEdge {
    /// 0-based index of the source entity.
    pub source_index: usize,
    /// 0-based index of the target entity.
    pub target_index: usize,
    /// SCREAMING_SNAKE_CASE relation label.
    pub relation_type: String,
    /// Fact sentence.
    pub fact: String,
    /// When the fact became true.
    pub valid_at: Option<DateTime<Utc>>,
    /// When the fact stopped being true.
    pub invalid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
struct EdgeEnvelope {
    #[serde(default)]
    edges: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawEdge {
    source_entity_id: i64,
    target_entity_id: i64,
    #[serde(default)]
    relation_type: Option<String>,
    #[serde(default)]
    fact: Option<String>,
    #[serde(default)]
    valid_at: Option<String>,
    #[serde(default)]
    invalid_at: Option<String>,
}

/// Relationship extractor backed by a language model.
#[derive(Clone)]
pub struct RelationExtractor {
    model: Arc<dyn LanguageModel>,
    separators: Regex,
}

impl RelationExtractor {
    /// Create an extractor.
    ///
    /// # Errors
    /// Returns an error if the relation label pattern fails to compile.
    pub fn new(model: Arc<dyn LanguageModel>) -> MemoryResult<Self> {
        Ok(Self {
            model,
            separators: Regex::new(r"[^\p{L}\p{N}]+")?,
        })
    }

    /// Extract facts among `entity_names`.
    ///
    /// Needs at least two entities. Malformed edges are dropped one by one.
    pub async fn extract(
        &self,
        content: &str,
        context: &str,
        entity_names: &[String],
        reference_time: DateTime<Utc>,
    ) -> Vec<ExtractedEdge> {
        if entity_names.len() < 2 {
            info!(
                entities = entity_names.len(),
                "Skipping relationship extraction: fewer than 2 entities"
            );
            return Vec::new();
        }

        let prompt = prompts::extract_edges(content, context, entity_names, &to_storage(&reference_time));
        let raw = match self.model.complete(prompts::EXTRACT_EDGES_SYSTEM, &prompt).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(%err, "Relationship extraction call failed");
                return Vec::new();
            }
        };

        let envelope: EdgeEnvelope = parse_or_default(&raw, "relationship extraction");
        let edges: Vec<ExtractedEdge> = envelope
            .edges
            .into_iter()
            .enumerate()
            .filter_map(|(i, value)| self.validate(i, value, entity_names.len()))
            .collect();
        debug!(edges = edges.len(), "Relationships extracted");
        edges
    }

    fn validate(&self, position: usize, value: Value, entity_count: usize) -> Option<ExtractedEdge> {
        let edge: RawEdge = match serde_json::from_value(value) {
            Ok(edge) => edge,
            Err(err) => {
                warn!(%err, position, "Dropping malformed edge");
                return None;
            }
        };

        let index = |id: i64| {
            usize::try_from(id)
                .ok()
                .filter(|id| (1..=entity_count).contains(id))
                .map(|id| id - 1)
        };
        let (Some(source_index), Some(target_index)) =
            (index(edge.source_entity_id), index(edge.target_entity_id))
        else {
            warn!(
                position,
                source = edge.source_entity_id,
                target = edge.target_entity_id,
                "Dropping edge with out-of-range entity id"
            );
            return None;
        };
        if source_index == target_index {
            warn!(position, "Dropping self-referencing edge");
            return None;
        }

        let relation_type = edge
            .relation_type
            .as_deref()
            .map(|r| self.relation_label(r))
            .filter(|r| !r.is_empty());
        let fact = edge
            .fact
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty());
        let (Some(relation_type), Some(fact)) = (relation_type, fact) else {
            warn!(position, "Dropping edge without relation_type or fact");
            return None;
        };

        let valid_at = edge.valid_at.as_deref().and_then(parse_timestamp);
        let mut invalid_at = edge.invalid_at.as_deref().and_then(parse_timestamp);
        if let (Some(valid), Some(invalid)) = (valid_at, invalid_at)
            && invalid < valid
        {
            warn!(%fact, "invalid_at precedes valid_at; dropping invalid_at");
            invalid_at = None;
        }

        Some(ExtractedEdge {
            source_index,
            target_index,
            relation_type,
            fact,
            valid_at,
            invalid_at,
        })
    }

    fn relation_label(&self, raw: &str) -> String {
        self.separators
            .replace_all(raw.trim(), "_")
            .trim_matches('_')
            .to_uppercase()
    }
}
