//! `MemoryObject`: one entity node in the knowledge graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::core::errors::{MemoryError, MemoryResult};
use crate::memory::core::ids::{GroupId, ObjectId};

/// Maximum summary length in characters.
pub const MAX_SUMMARY_CHARS: usize = 250;

/// A graph node representing one entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryObject {
    /// Unique identifier within the partition.
    pub uuid: ObjectId,
    /// Entity name as it appears in conversation.
    pub name: String,
    /// Embedding over `name`; absent when the embedder failed.
    pub embedding: Option<Vec<f32>>,
    /// Short description, at most [`MAX_SUMMARY_CHARS`] characters.
    pub summary: String,
    /// Partition key.
    pub group_id: GroupId,
    /// Entity type name(s).
    pub labels: Vec<String>,
    /// First time the node was written.
    pub created_at: DateTime<Utc>,
}

impl MemoryObject {
    /// Create a new node with a fresh id and no embedding.
    ///
    /// # Errors
    /// Returns an error if the name is empty after trimming.
    pub fn new(group_id: GroupId, name: impl Into<String>) -> MemoryResult<Self> {
        Self::with_id(ObjectId::new(), group_id, name)
    }

    /// Create a node with a caller-chosen id.
    ///
    /// # Errors
    /// Returns an error if the name is empty after trimming.
    pub fn with_id(
        uuid: ObjectId,
        group_id: GroupId,
        name: impl Into<String>,
    ) -> MemoryResult<Self> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(MemoryError::InvalidGraphData(
                "object name is empty".to_string(),
            ));
        }

        Ok(Self {
            uuid,
            name: trimmed.to_string(),
            embedding: None,
            summary: String::new(),
            group_id,
            labels: Vec::new(),
            created_at: Utc::now(),
        })
    }

    /// Attach a label if it is not present yet.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        if !label.trim().is_empty() && !self.labels.contains(&label) {
            self.labels.push(label);
        }
        self
    }

    /// Set the summary.
    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Set the name embedding.
    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Validate node invariants before a write.
    ///
    /// # Errors
    /// Returns an error if the name is empty or the summary exceeds the limit.
    pub fn validate(&self) -> MemoryResult<()> {
        if self.name.trim().is_empty() {
            return Err(MemoryError::InvalidGraphData(
                "object name is empty".to_string(),
            ));
        }

        if self.summary.chars().count() > MAX_SUMMARY_CHARS {
            return Err(MemoryError::InvalidGraphData(format!(
                "summary for '{}' exceeds {MAX_SUMMARY_CHARS} chars",
                self.name
            )));
        }

        Ok(())
    }

    /// Primary label, if any.
    #[must_use]
    pub fn primary_label(&self) -> Option<&str> {
        self.labels.first().map(String::as_str)
    }
}
