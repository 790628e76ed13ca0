//! Prompt text for every model call made by the extraction pipeline.

use std::fmt::Write;

/// System preamble for entity extraction.
pub const EXTRACT_ENTITIES_SYSTEM: &str = "You are an AI assistant that extracts entity nodes from conversational messages. \
Your primary task is to extract and classify significant entities mentioned in the conversation. \
Respond with JSON only.";

/// System preamble for the "what did you miss?" check.
pub const REFLEXION_SYSTEM: &str = "You are an AI assistant that determines which entities have not been extracted from the given context. \
Respond with JSON only.";

/// System preamble for entity deduplication.
pub const DEDUPE_SYSTEM: &str = "You are a helpful assistant that determines whether or not newly extracted entities are duplicates of existing entities. \
Respond with JSON only.";

/// System preamble for summaries.
pub const SUMMARY_SYSTEM: &str = "You are a helpful assistant that writes short, factual summaries of entities from conversation content. \
Respond with JSON only.";

/// System preamble for relationship extraction.
pub const EXTRACT_EDGES_SYSTEM: &str = "You are an expert fact extractor that extracts fact triples from text. \
Each fact connects two of the provided entities. Respond with JSON only.";

/// Entity extraction prompt. `missed` is non-empty on reflexion passes.
#[must_use]
pub fn extract_entities(content: &str, context: &str, entity_types: &str, missed: &[String]) -> String {
    let mut prompt = String::new();
    let _ = write!(
        prompt,
        "<ENTITY TYPES>\n{entity_types}\n</ENTITY TYPES>\n\n\
         <PREVIOUS MESSAGES>\n{context}\n</PREVIOUS MESSAGES>\n\n\
         <CURRENT MESSAGE>\n{content}\n</CURRENT MESSAGE>\n\n\
         Extract entities explicitly or implicitly mentioned in the CURRENT MESSAGE.\n\
         Classify each entity with the `id` of the most fitting ENTITY TYPE.\n\
         Do not extract relationships, actions, dates or times as entities.\n\
         Use full, unambiguous names. Use PREVIOUS MESSAGES only to resolve references.\n"
    );

    if !missed.is_empty() {
        let _ = write!(
            prompt,
            "\nThe following entities were missed in a previous extraction and must be included: {}\n",
            missed.join(", ")
        );
    }

    prompt.push_str(
        "\nRespond with a JSON object of the form:\n\
         {\"extracted_entities\": [{\"name\": \"...\", \"entity_type_id\": 0}]}",
    );
    prompt
}

/// Reflexion prompt listing what was already extracted.
#[must_use]
pub fn reflexion(content: &str, context: &str, extracted: &[String]) -> String {
    format!(
        "<PREVIOUS MESSAGES>\n{context}\n</PREVIOUS MESSAGES>\n\n\
         <CURRENT MESSAGE>\n{content}\n</CURRENT MESSAGE>\n\n\
         <EXTRACTED ENTITIES>\n{}\n</EXTRACTED ENTITIES>\n\n\
         Given the messages and the list of extracted entities, determine if any entities \
         mentioned in the CURRENT MESSAGE have not been extracted.\n\
         Respond with a JSON object of the form:\n\
         {{\"missed_entities\": [\"name\", ...]}}\n\
         Use an empty list when nothing was missed.",
        extracted.join("\n")
    )
}

/// One unresolved entity shown to the deduplication prompt.
#[derive(Debug, Clone)]
pub struct DedupeEntity<'a> {
    /// Extraction index used as the response `id`.
    pub id: usize,
    /// Extracted name.
    pub name: &'a str,
    /// Type label.
    pub entity_type: &'a str,
}

/// One existing node shown to the deduplication prompt.
#[derive(Debug, Clone)]
pub struct DedupeCandidate<'a> {
    /// Position in the candidate list, used as `duplicate_idx`.
    pub idx: usize,
    /// Stored name.
    pub name: &'a str,
    /// Stored labels.
    pub entity_types: &'a [String],
    /// Stored summary.
    pub summary: &'a str,
}

/// Deduplication prompt for entities the deterministic pass left unresolved.
#[must_use]
pub fn dedupe_entities(
    content: &str,
    entities: &[DedupeEntity<'_>],
    candidates: &[DedupeCandidate<'_>],
) -> String {
    let mut new_entities = String::new();
    for entity in entities {
        let _ = writeln!(
            new_entities,
            "{{\"id\": {}, \"name\": {:?}, \"entity_type\": {:?}}}",
            entity.id, entity.name, entity.entity_type
        );
    }

    let mut existing = String::new();
    for candidate in candidates {
        let _ = writeln!(
            existing,
            "{{\"idx\": {}, \"name\": {:?}, \"entity_types\": {:?}, \"summary\": {:?}}}",
            candidate.idx, candidate.name, candidate.entity_types, candidate.summary
        );
    }

    format!(
        "<CURRENT MESSAGE>\n{content}\n</CURRENT MESSAGE>\n\n\
         <NEW ENTITIES>\n{new_entities}</NEW ENTITIES>\n\n\
         <EXISTING ENTITIES>\n{existing}</EXISTING ENTITIES>\n\n\
         For each NEW ENTITY decide whether it refers to the same real-world object as one \
         of the EXISTING ENTITIES. Entities are duplicates only if they refer to the same \
         thing, not merely similar things.\n\
         Respond with a JSON object of the form:\n\
         {{\"entity_resolutions\": [{{\"id\": 0, \"duplicate_idx\": -1}}]}}\n\
         `id` is the NEW ENTITY id. `duplicate_idx` is the EXISTING ENTITY idx, or -1 if none."
    )
}

/// Summary prompt; `existing` is empty for new entities.
#[must_use]
pub fn summarize_entity(
    name: &str,
    entity_type: &str,
    existing: &str,
    content: &str,
    context: &str,
    max_chars: usize,
) -> String {
    format!(
        "<PREVIOUS MESSAGES>\n{context}\n</PREVIOUS MESSAGES>\n\n\
         <CURRENT MESSAGE>\n{content}\n</CURRENT MESSAGE>\n\n\
         <ENTITY>\nname: {name}\ntype: {entity_type}\n</ENTITY>\n\n\
         <EXISTING SUMMARY>\n{existing}\n</EXISTING SUMMARY>\n\n\
         Write a summary of the ENTITY using only information from the messages. \
         If an EXISTING SUMMARY is present, merge the new information into it and keep \
         facts that are still true. The summary must be under {max_chars} characters.\n\
         Respond with a JSON object of the form: {{\"summary\": \"...\"}}"
    )
}

/// Relationship extraction prompt over a 1-indexed entity list.
#[must_use]
pub fn extract_edges(content: &str, context: &str, entity_names: &[String], reference_time: &str) -> String {
    let mut entities = String::new();
    for (i, name) in entity_names.iter().enumerate() {
        let _ = writeln!(entities, "{}: {name}", i + 1);
    }

    format!(
        "<PREVIOUS MESSAGES>\n{context}\n</PREVIOUS MESSAGES>\n\n\
         <CURRENT MESSAGE>\n{content}\n</CURRENT MESSAGE>\n\n\
         <ENTITIES>\n{entities}</ENTITIES>\n\n\
         <REFERENCE TIME>\n{reference_time}\n</REFERENCE TIME>\n\n\
         Extract all factual relationships between the ENTITIES stated in the CURRENT MESSAGE.\n\
         - source_entity_id and target_entity_id are numbers from the ENTITIES list and must differ.\n\
         - relation_type is a short SCREAMING_SNAKE_CASE label such as WORKS_AT.\n\
         - fact is a natural language sentence stating the relationship.\n\
         - valid_at / invalid_at are ISO 8601 timestamps resolved against the REFERENCE TIME, or null.\n\
         Respond with a JSON object of the form:\n\
         {{\"edges\": [{{\"source_entity_id\": 1, \"target_entity_id\": 2, \"relation_type\": \"...\", \
         \"fact\": \"...\", \"valid_at\": null, \"invalid_at\": null}}]}}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missed_entities_are_listed_on_retry() {
        let first = extract_entities("hi", "", "[]", &[]);
        let retry = extract_entities("hi", "", "[]", &["Alice".to_string()]);
        assert!(!first.contains("were missed"));
        assert!(retry.contains("were missed in a previous extraction and must be included: Alice"));
    }

    #[test]
    fn edge_prompt_is_one_indexed() {
        let prompt = extract_edges("x", "", &["Alice".to_string(), "Rust".to_string()], "now");
        assert!(prompt.contains("1: Alice\n2: Rust\n"));
    }

    #[test]
    fn dedupe_prompt_lists_both_sides() {
        let labels = vec!["Person".to_string()];
        let prompt = dedupe_entities(
            "content",
            &[DedupeEntity { id: 3, name: "Bob", entity_type: "Person" }],
            &[DedupeCandidate { idx: 0, name: "Robert", entity_types: &labels, summary: "An engineer" }],
        );
        assert!(prompt.contains("\"id\": 3"));
        assert!(prompt.contains("\"idx\": 0, \"name\": \"Robert\""));
    }
}
