//! Per-entity summary generation.
//!
//! Summaries are produced (or merge-updated from the stored one) by the model and cut
//! to the character limit at a sentence boundary. Entities are independent, so calls
//! run with bounded concurrency while keeping input order.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::memory::completion::LanguageModel;
use crate::memory::core::ids::ObjectId;
use crate::memory::ingest::entity_resolution::ResolvedEntity;
use crate::memory::ingest::json_output::{ParseError, parse_model_json};
use crate::memory::ingest::prompts;

/// Cut `text` to at most `max_chars` characters.
///
/// Prefers the last `.`, `!` or `?` at or before the limit; otherwise hard-cuts.
#[must_use]
pub fn truncate_summary(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let head: String = text.chars().take(max_chars).collect();
    match head.rfind(['.', '!', '?']) {
        Some(pos) => head[..=pos].trim_end().to_string(),
        None => head.trim_end().to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct SummaryOutput {
    summary: String,
}

/// Generates entity summaries with a language model.
#[derive(Clone)]
pub struct Summarizer {
    model: Arc<dyn LanguageModel>,
    max_chars: usize,
    concurrency: usize,
}

impl Summarizer {
    /// Create a summarizer. `concurrency` is clamped to at least 1.
    #[must_use]
    pub fn new(model: Arc<dyn LanguageModel>, max_chars: usize, concurrency: usize) -> Self {
        Self {
            model,
            max_chars,
            concurrency: concurrency.max(1),
        }
    }

    /// One summary per entity, in input order.
    ///
    /// Mentions sharing a uuid are summarized once and share the result.
    pub async fn summarize_all(
        &self,
        entities: &[ResolvedEntity],
        content: &str,
        context: &str,
    ) -> Vec<String> {
        let mut slots: HashMap<ObjectId, usize> = HashMap::new();
        let mut distinct: Vec<&ResolvedEntity> = Vec::new();
        let order: Vec<usize> = entities
            .iter()
            .map(|entity| {
                *slots.entry(entity.uuid).or_insert_with(|| {
                    distinct.push(entity);
                    distinct.len() - 1
                })
            })
            .collect();

        let calls: Vec<_> = distinct
            .iter()
            .map(|entity| self.summarize(entity, content, context))
            .collect();
        let summaries: Vec<String> = stream::iter(calls)
            .buffered(self.concurrency)
            .collect()
            .await;

        order
            .into_iter()
            .map(|slot| summaries.get(slot).cloned().unwrap_or_default())
            .collect()
    }

    /// Summary for one entity, merged with its stored summary when it has one.
    ///
    /// A failed call or malformed JSON keeps the stored summary; output without any JSON
    /// is used as plain text.
    pub async fn summarize(&self, entity: &ResolvedEntity, content: &str, context: &str) -> String {
        let existing = entity
            .existing
            .as_ref()
            .map_or("", |node| node.summary.as_str());
        let prompt = prompts::summarize_entity(
            &entity.name,
            &entity.label,
            existing,
            content,
            context,
            self.max_chars,
        );

        let raw = match self.model.complete(prompts::SUMMARY_SYSTEM, &prompt).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(%err, name = %entity.name, "Summary call failed; keeping stored summary");
                return existing.to_string();
            }
        };

        let summary = match parse_model_json::<SummaryOutput>(&raw) {
            Ok(output) => output.summary,
            Err(ParseError::NoJson) => {
                debug!(name = %entity.name, "Summary output is not JSON; using raw text");
                raw
            }
            Err(err) => {
                warn!(%err, name = %entity.name, "Unusable summary output; keeping stored summary");
                String::new()
            }
        };

        let summary = truncate_summary(&summary, self.max_chars);
        if summary.is_empty() {
            existing.to_string()
        } else {
            summary
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::core::object::{MAX_SUMMARY_CHARS, MemoryObject};
    use crate::memory::testing::{ScriptedModel, test_group};

    fn resolved(name: &str, existing: Option<MemoryObject>) -> ResolvedEntity {
        ResolvedEntity {
            index: 0,
            name: name.to_string(),
            entity_type_id: 1,
            label: "Person".to_string(),
            uuid: existing.as_ref().map_or_else(ObjectId::new, |n| n.uuid),
            existing,
            match_type: None,
        }
    }

    #[test]
    fn short_text_is_unchanged() {
        assert_eq!(truncate_summary("  Short one.  ", 250), "Short one.");
    }

    #[test]
    fn cuts_at_last_sentence_boundary() {
        let text = "First sentence. Second sentence! Third sentence that runs long";
        assert_eq!(truncate_summary(text, 40), "First sentence. Second sentence!");
    }

    #[test]
    fn hard_cut_without_boundary() {
        let text = "a".repeat(300);
        assert_eq!(truncate_summary(&text, MAX_SUMMARY_CHARS).chars().count(), MAX_SUMMARY_CHARS);
    }

    #[test]
    fn never_exceeds_limit_with_multibyte_text() {
        let text = "é".repeat(400) + ". tail";
        assert!(truncate_summary(&text, MAX_SUMMARY_CHARS).chars().count() <= MAX_SUMMARY_CHARS);
    }

    #[tokio::test]
    async fn merges_with_existing_summary() {
        let model = Arc::new(ScriptedModel::new());
        model.push(prompts::SUMMARY_SYSTEM, r#"{"summary": "Alice is an engineer. She moved to Berlin."}"#);
        let node = MemoryObject::new(test_group(), "Alice")
            .unwrap()
            .with_summary("Alice is an engineer.");

        let summarizer = Summarizer::new(model.clone(), MAX_SUMMARY_CHARS, 2);
        let summary = summarizer
            .summarize(&resolved("Alice", Some(node)), "Alice moved to Berlin", "")
            .await;

        assert_eq!(summary, "Alice is an engineer. She moved to Berlin.");
        let sent = model.prompts(prompts::SUMMARY_SYSTEM);
        assert!(sent[0].contains("<EXISTING SUMMARY>\nAlice is an engineer.\n"));
    }

    #[tokio::test]
    async fn failure_keeps_existing_summary() {
        let model = Arc::new(ScriptedModel::failing());
        let node = MemoryObject::new(test_group(), "Alice").unwrap().with_summary("Known.");
        let summarizer = Summarizer::new(model, MAX_SUMMARY_CHARS, 1);
        let summary = summarizer.summarize(&resolved("Alice", Some(node)), "x", "").await;
        assert_eq!(summary, "Known.");
    }

    #[tokio::test]
    async fn malformed_json_keeps_existing_summary() {
        let model = Arc::new(ScriptedModel::new());
        model.push(prompts::SUMMARY_SYSTEM, r#"{"text": "wrong field"}"#);
        let node = MemoryObject::new(test_group(), "Alice").unwrap().with_summary("Known.");
        let summarizer = Summarizer::new(model, MAX_SUMMARY_CHARS, 1);
        let summary = summarizer.summarize(&resolved("Alice", Some(node)), "x", "").await;
        assert_eq!(summary, "Known.");
    }

    #[tokio::test]
    async fn fan_out_preserves_order() {
        let model = Arc::new(ScriptedModel::new());
        for _ in 0..3 {
            model.push(prompts::SUMMARY_SYSTEM, "Plain text summary.");
        }
        let summarizer = Summarizer::new(model.clone(), MAX_SUMMARY_CHARS, 3);
        let entities = vec![resolved("A", None), resolved("B", None), resolved("C", None)];
        let summaries = summarizer.summarize_all(&entities, "A, B and C", "").await;
        assert_eq!(summaries.len(), 3);
        assert!(summaries.iter().all(|s| s == "Plain text summary."));
        assert_eq!(model.calls(prompts::SUMMARY_SYSTEM), 3);
    }

    #[tokio::test]
    async fn repeated_mentions_share_one_call() {
        let model = Arc::new(ScriptedModel::new());
        model.push(prompts::SUMMARY_SYSTEM, r#"{"summary": "Alice writes Rust."}"#);
        model.push(prompts::SUMMARY_SYSTEM, r#"{"summary": "Bob reviews code."}"#);
        let summarizer = Summarizer::new(model.clone(), MAX_SUMMARY_CHARS, 2);

        let alice = resolved("Alice", None);
        let mut again = resolved("alice", None);
        again.uuid = alice.uuid;
        let entities = vec![alice, resolved("Bob", None), again];

        let summaries = summarizer.summarize_all(&entities, "Alice and Bob", "").await;
        assert_eq!(model.calls(prompts::SUMMARY_SYSTEM), 2);
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0], summaries[2]);
        assert_ne!(summaries[0], summaries[1]);
    }
}
