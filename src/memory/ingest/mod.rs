//! Extraction pipeline: entities, deduplication, summaries and relationships.

pub mod dedupe;
pub mod entity_extractor;
pub mod entity_resolution;
pub mod json_output;
pub mod prompts;
pub mod relation_extractor;
pub mod summarizer;

pub use dedupe::{jaro_winkler, name_similarity, normalize_name, normalize_text};
pub use entity_extractor::{EntityExtractor, ExtractedEntity, MAX_REFLEXION_ITERATIONS};
pub use entity_resolution::{
    DedupMatch, EntityResolver, MatchType, ResolvedEntity, deterministic_matches,
};
pub use json_output::{ParseError, parse_model_json, parse_or_default};
pub use relation_extractor::{ExtractedEdge, RelationExtractor};
pub use summarizer::{Summarizer, truncate_summary};
