//! Entity-type taxonomy used by extraction prompts and node labels.
//!
//! The taxonomy is an array of `{id, name, description}` records. The raw JSON text is
//! kept as loaded because it is embedded verbatim into extraction prompts.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::memory::core::errors::{MemoryError, MemoryResult};

/// Taxonomy shipped with the crate.
const BUILTIN_ENTITY_TYPES: &str = include_str!("../../../config/entity-types.json");

/// Label used when a model returns an unknown type id.
pub const FALLBACK_LABEL: &str = "Entity";

/// One entry of the taxonomy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    /// Numeric id referenced by the model.
    pub id: i64,
    /// Label written on nodes.
    pub name: String,
    /// Guidance for the model.
    pub description: String,
}

/// Loaded, validated taxonomy.
#[derive(Clone, Debug)]
pub struct EntityTypeRegistry {
    types: Vec<EntityType>,
    raw: String,
}

impl EntityTypeRegistry {
    /// Registry built from the taxonomy shipped with the crate.
    ///
    /// # Errors
    /// Returns an error if the bundled file is invalid.
    pub fn builtin() -> MemoryResult<Self> {
        Self::from_json(BUILTIN_ENTITY_TYPES)
    }

    /// Load a taxonomy file, or the bundled one when `path` is `None`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is invalid.
    pub fn load(path: Option<&Path>) -> MemoryResult<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                tracing::info!(path = %path.display(), "Loaded entity types");
                Self::from_json(&raw)
            }
            None => Self::builtin(),
        }
    }

    /// Parse and validate a taxonomy from JSON text.
    ///
    /// # Errors
    /// Returns an error on malformed JSON, an empty list, duplicate ids or empty names.
    pub fn from_json(raw: &str) -> MemoryResult<Self> {
        let types: Vec<EntityType> = serde_json::from_str(raw)?;
        if types.is_empty() {
            return Err(MemoryError::InvalidConfig(
                "entity types must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for entity_type in &types {
            if entity_type.name.trim().is_empty() {
                return Err(MemoryError::InvalidConfig(format!(
                    "entity type {} has an empty name",
                    entity_type.id
                )));
            }
            if !seen.insert(entity_type.id) {
                return Err(MemoryError::InvalidConfig(format!(
                    "duplicate entity type id {}",
                    entity_type.id
                )));
            }
        }

        Ok(Self {
            types,
            raw: raw.trim().to_string(),
        })
    }

    /// The taxonomy text exactly as loaded, for prompts.
    #[must_use]
    pub fn prompt_block(&self) -> &str {
        &self.raw
    }

    /// All entries in file order.
    #[must_use]
    pub fn types(&self) -> &[EntityType] {
        &self.types
    }

    /// Look up an entry by id.
    #[must_use]
    pub fn get(&self, id: i64) -> Option<&EntityType> {
        self.types.iter().find(|t| t.id == id)
    }

    /// Label for `id`, or [`FALLBACK_LABEL`] when unknown.
    #[must_use]
    pub fn name_for(&self, id: i64) -> &str {
        self.get(id).map_or(FALLBACK_LABEL, |t| t.name.as_str())
    }

    /// Case-insensitive lookup by label.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<&EntityType> {
        let name = name.trim();
        self.types
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_taxonomy_loads() {
        let registry = EntityTypeRegistry::builtin().unwrap();
        assert!(!registry.types().is_empty());
        assert_eq!(registry.name_for(1), "Person");
        assert!(registry.prompt_block().starts_with('['));
    }

    #[test]
    fn unknown_id_falls_back() {
        let registry = EntityTypeRegistry::builtin().unwrap();
        assert_eq!(registry.name_for(9_999), FALLBACK_LABEL);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let raw = r#"[{"id":1,"name":"A","description":""},{"id":1,"name":"B","description":""}]"#;
        assert!(EntityTypeRegistry::from_json(raw).is_err());
        assert!(EntityTypeRegistry::from_json("[]").is_err());
    }

    #[test]
    fn lookup_by_name_ignores_case() {
        let registry = EntityTypeRegistry::builtin().unwrap();
        assert_eq!(registry.find_by_name(" technology ").map(|t| t.id), Some(4));
    }
}
