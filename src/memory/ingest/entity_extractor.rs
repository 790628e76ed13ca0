//! Model-driven entity extraction with a bounded reflexion loop.
//!
//! Each pass asks the model for `(name, entity_type_id)` pairs. While iterations
//! remain, the model is asked which entities it missed; reported omissions are fed
//! into the next pass. Extraction never fails: bad output degrades to fewer entities.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::memory::completion::LanguageModel;
use crate::memory::core::entity_types::EntityTypeRegistry;
use crate::memory::ingest::dedupe::normalize_name;
use crate::memory::ingest::json_output::parse_or_default;
use crate::memory::ingest::prompts;

/// Extra reflexion passes after the first extraction.
pub const MAX_REFLEXION_ITERATIONS: usize = 2;

/// One entity found in the content.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExtractedEntity {
    /// Name as written by the model.
    pub name: String,
    /// Taxonomy id.
    #[serde(default)]
    pub entity_type_id: i64,
}

#[derive(Debug, Default, Deserialize)]
struct ExtractedEntities {
    #[serde(default)]
    extracted_entities: Vec<ExtractedEntity>,
}

#[derive(Debug, Default, Deserialize)]
struct MissedEntities {
    #[serde(default)]
    missed_entities: Vec<String>,
}

/// Entity extractor backed by a language model.
#[derive(Clone)]
pub struct EntityExtractor {
    model: Arc<dyn LanguageModel>,
    types: Arc<EntityTypeRegistry>,
    max_reflexion_iterations: usize,
}

impl EntityExtractor {
    /// Create an extractor with [`MAX_REFLEXION_ITERATIONS`].
    #[must_use]
    pub fn new(model: Arc<dyn LanguageModel>, types: Arc<EntityTypeRegistry>) -> Self {
        Self {
            model,
            types,
            max_reflexion_iterations: MAX_REFLEXION_ITERATIONS,
        }
    }

    /// Override the number of reflexion passes.
    #[must_use]
    pub const fn with_max_reflexion_iterations(mut self, iterations: usize) -> Self {
        self.max_reflexion_iterations = iterations;
        self
    }

    /// Extract entities from `content`, using `context` to resolve references.
    ///
    /// Runs at most `max_reflexion_iterations + 1` extraction passes.
    pub async fn extract(&self, content: &str, context: &str) -> Vec<ExtractedEntity> {
        let mut entities: Vec<ExtractedEntity> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut missed: Vec<String> = Vec::new();

        for iteration in 0..=self.max_reflexion_iterations {
            let prompt =
                prompts::extract_entities(content, context, self.types.prompt_block(), &missed);
            let raw = match self
                .model
                .complete(prompts::EXTRACT_ENTITIES_SYSTEM, &prompt)
                .await
            {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(%err, iteration, "Entity extraction call failed");
                    break;
                }
            };

            let parsed: ExtractedEntities = parse_or_default(&raw, "entity extraction");
            for entity in parsed.extracted_entities {
                let name = entity.name.trim();
                if name.is_empty() {
                    continue;
                }
                let is_new = seen.insert(normalize_name(name));
                if iteration == 0 || is_new {
                    entities.push(ExtractedEntity {
                        name: name.to_string(),
                        entity_type_id: entity.entity_type_id,
                    });
                }
            }

            if iteration == self.max_reflexion_iterations {
                break;
            }

            missed = self.check_missed(content, context, &entities).await;
            if missed.is_empty() {
                break;
            }
            debug!(iteration, missed = ?missed, "Reflexion reported missed entities");
        }

        entities
    }

    async fn check_missed(
        &self,
        content: &str,
        context: &str,
        entities: &[ExtractedEntity],
    ) -> Vec<String> {
        let names: Vec<String> = entities.iter().map(|e| e.name.clone()).collect();
        let prompt = prompts::reflexion(content, context, &names);
        match self.model.complete(prompts::REFLEXION_SYSTEM, &prompt).await {
            Ok(raw) => {
                let parsed: MissedEntities = parse_or_default(&raw, "reflexion");
                parsed
                    .missed_entities
                    .into_iter()
                    .map(|name| name.trim().to_string())
                    .filter(|name| !name.is_empty())
                    .collect()
            }
            Err(err) => {
                warn!(%err, "Reflexion call failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::testing::ScriptedModel;

    fn extractor(model: &Arc<ScriptedModel>) -> EntityExtractor {
        EntityExtractor::new(
            model.clone(),
            Arc::new(EntityTypeRegistry::builtin().unwrap()),
        )
    }

    #[tokio::test]
    async fn single_pass_when_nothing_missed() {
        let model = Arc::new(ScriptedModel::new());
        model.push(
            prompts::EXTRACT_ENTITIES_SYSTEM,
            r#"```json
{"extracted_entities": [{"name": "Alice", "entity_type_id": 1}, {"name": "Rust", "entity_type_id": 4}]}
```"#,
        );
        model.push(prompts::REFLEXION_SYSTEM, r#"{"missed_entities": []}"#);

        let entities = extractor(&model).extract("Alice uses Rust", "").await;
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[1].entity_type_id, 4);
        assert_eq!(model.calls(prompts::EXTRACT_ENTITIES_SYSTEM), 1);
        assert_eq!(model.calls(prompts::REFLEXION_SYSTEM), 1);
    }

    #[tokio::test]
    async fn reflexion_always_terminates() {
        let model = Arc::new(ScriptedModel::new());
        for i in 0..10 {
            model.push(
                prompts::EXTRACT_ENTITIES_SYSTEM,
                &format!(r#"{{"extracted_entities": [{{"name": "E{i}", "entity_type_id": 0}}]}}"#),
            );
            model.push(prompts::REFLEXION_SYSTEM, r#"{"missed_entities": ["Something"]}"#);
        }

        let entities = extractor(&model).extract("content", "").await;
        assert_eq!(model.calls(prompts::EXTRACT_ENTITIES_SYSTEM), MAX_REFLEXION_ITERATIONS + 1);
        assert_eq!(model.calls(prompts::REFLEXION_SYSTEM), MAX_REFLEXION_ITERATIONS);
        assert_eq!(entities.len(), MAX_REFLEXION_ITERATIONS + 1);
        let retry = model.prompts(prompts::EXTRACT_ENTITIES_SYSTEM);
        assert!(retry[1].contains("must be included: Something"));
    }

    #[tokio::test]
    async fn later_passes_only_add_new_names() {
        let model = Arc::new(ScriptedModel::new());
        model.push(
            prompts::EXTRACT_ENTITIES_SYSTEM,
            r#"{"extracted_entities": [{"name": "Alice", "entity_type_id": 1}]}"#,
        );
        model.push(prompts::REFLEXION_SYSTEM, r#"{"missed_entities": ["Berlin"]}"#);
        model.push(
            prompts::EXTRACT_ENTITIES_SYSTEM,
            r#"{"extracted_entities": [{"name": "alice", "entity_type_id": 1}, {"name": "Berlin", "entity_type_id": 3}]}"#,
        );
        model.push(prompts::REFLEXION_SYSTEM, r#"{"missed_entities": []}"#);

        let names: Vec<String> = extractor(&model)
            .extract("Alice lives in Berlin", "")
            .await
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["Alice", "Berlin"]);
    }

    #[tokio::test]
    async fn garbage_output_yields_no_entities() {
        let model = Arc::new(ScriptedModel::new());
        model.push(prompts::EXTRACT_ENTITIES_SYSTEM, "I could not find anything.");
        let entities = extractor(&model).extract("hello", "").await;
        assert!(entities.is_empty());
    }

    #[tokio::test]
    async fn model_failure_yields_no_entities() {
        let model = Arc::new(ScriptedModel::failing());
        let entities = extractor(&model).extract("hello", "").await;
        assert!(entities.is_empty());
        assert_eq!(model.calls(prompts::REFLEXION_SYSTEM), 0);
    }
}
