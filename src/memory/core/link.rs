//! `MemoryLink`: a bi-temporal fact between two `MemoryObject`s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::core::errors::{MemoryError, MemoryResult};
use crate::memory::core::ids::{EpisodeId, GroupId, LinkId, ObjectId};

/// A graph edge representing one fact between two entities.
///
/// - **Valid time** (`valid_at` / `invalid_at`): when the fact was true.
/// - **Transaction time** (`created_at`): when the edge was first written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryLink {
    /// Unique identifier.
    pub uuid: LinkId,
    /// Source node.
    pub source_node_uuid: ObjectId,
    /// Target node.
    pub target_node_uuid: ObjectId,
    /// Short relation label (e.g. `works_at`).
    pub relation_type: String,
    /// Fact text.
    pub description: String,
    /// Embedding over `description`; absent when the embedder failed.
    pub description_embedding: Option<Vec<f32>>,
    /// When the fact became true.
    pub valid_at: Option<DateTime<Utc>>,
    /// When the fact stopped being true.
    pub invalid_at: Option<DateTime<Utc>>,
    /// When the edge was written.
    pub created_at: DateTime<Utc>,
    /// Originating episodes.
    pub sources: Vec<EpisodeId>,
    /// Partition key.
    pub group_id: GroupId,
}

impl MemoryLink {
    /// Create a link between two nodes.
    ///
    /// # Errors
    /// Returns an error if the relation type is empty.
    pub fn new(
        group_id: GroupId,
        source_node_uuid: ObjectId,
        target_node_uuid: ObjectId,
        relation_type: impl Into<String>,
        description: impl Into<String>,
    ) -> MemoryResult<Self> {
        let relation_type = relation_type.into().trim().to_string();
        if relation_type.is_empty() {
            return Err(MemoryError::InvalidGraphData(
                "relation type is empty".to_string(),
            ));
        }
        let description = description.into().trim().to_string();

        Ok(Self {
            uuid: LinkId::new(),
            source_node_uuid,
            target_node_uuid,
            relation_type,
            description,
            description_embedding: None,
            valid_at: None,
            invalid_at: None,
            created_at: Utc::now(),
            sources: Vec::new(),
            group_id,
        })
    }

    /// Set the valid-time interval.
    #[must_use]
    pub const fn with_validity(
        mut self,
        valid_at: Option<DateTime<Utc>>,
        invalid_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.valid_at = valid_at;
        self.invalid_at = invalid_at;
        self
    }

    /// Record an originating episode.
    #[must_use]
    pub fn with_source(mut self, episode: EpisodeId) -> Self {
        if !self.sources.contains(&episode) {
            self.sources.push(episode);
        }
        self
    }

    /// Whether the fact is still current (never invalidated).
    #[must_use]
    pub const fn is_current(&self) -> bool {
        self.invalid_at.is_none()
    }

    /// Whether the fact held at `as_of`.
    ///
    /// A missing `valid_at` falls back to `created_at`.
    #[must_use]
    pub fn is_valid_at(&self, as_of: DateTime<Utc>) -> bool {
        let start = self.valid_at.unwrap_or(self.created_at);
        start <= as_of && self.invalid_at.is_none_or(|end| end > as_of)
    }

    /// Validate link invariants before a write.
    ///
    /// # Errors
    /// Returns an error if the relation is empty or `invalid_at < valid_at`.
    pub fn validate(&self) -> MemoryResult<()> {
        if self.relation_type.trim().is_empty() {
            return Err(MemoryError::InvalidGraphData(
                "relation type is empty".to_string(),
            ));
        }

        if let (Some(valid), Some(invalid)) = (self.valid_at, self.invalid_at)
            && invalid < valid
        {
            return Err(MemoryError::InvalidGraphData(format!(
                "link {} has invalid_at before valid_at",
                self.uuid
            )));
        }

        Ok(())
    }
}
