//! Graph store abstraction and connection state.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::memory::core::errors::{MemoryError, MemoryResult};
use crate::memory::core::ids::{GroupId, LinkId, ObjectId};
use crate::memory::core::link::MemoryLink;
use crate::memory::core::object::MemoryObject;

/// Boxed future type for graph store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A node returned by a search branch.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoredObject {
    /// Node id.
    pub uuid: ObjectId,
    /// Node name.
    pub name: String,
    /// Node summary.
    pub summary: String,
    /// Branch-specific score; higher is better.
    pub score: f32,
}

/// Outcome of a node deletion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Node removed together with `links_removed` links.
    Deleted {
        /// Number of links removed with the node.
        links_removed: usize,
    },
    /// Node still has links and cascading was not requested.
    HasLinks {
        /// Number of links touching the node.
        links: usize,
    },
    /// No such node.
    NotFound,
}

/// Node and link totals for a partition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GraphCounts {
    /// Number of nodes.
    pub objects: usize,
    /// Number of links, current and invalidated.
    pub links: usize,
}

/// Typed merge/read operations over the knowledge graph.
///
/// Every method is scoped to one partition.
pub trait GraphStore: Send + Sync {
    /// Create fulltext and vector indexes if they do not exist yet.
    ///
    /// # Errors
    /// Returns an error if index creation fails.
    fn ensure_indexes(&self) -> StoreFuture<'_, MemoryResult<()>>;

    /// Upsert nodes then links in one transaction, merging by uuid.
    ///
    /// Stored labels are unioned with incoming labels. Link sources are unioned.
    ///
    /// # Errors
    /// Returns an error if a link endpoint is missing or the write fails.
    fn upsert_graph<'a>(
        &'a self,
        group: &'a GroupId,
        objects: &'a [MemoryObject],
        links: &'a [MemoryLink],
    ) -> StoreFuture<'a, MemoryResult<()>>;

    /// Existing nodes plausibly matching any of `names`.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    fn find_candidates<'a>(
        &'a self,
        group: &'a GroupId,
        names: &'a [String],
        limit_per_name: usize,
    ) -> StoreFuture<'a, MemoryResult<Vec<MemoryObject>>>;

    /// Fetch a node by id.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    fn get_object<'a>(
        &'a self,
        group: &'a GroupId,
        uuid: ObjectId,
    ) -> StoreFuture<'a, MemoryResult<Option<MemoryObject>>>;

    /// Fetch a node by case-insensitive exact name.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    fn find_object_by_name<'a>(
        &'a self,
        group: &'a GroupId,
        name: &'a str,
    ) -> StoreFuture<'a, MemoryResult<Option<MemoryObject>>>;

    /// Fulltext search over node names.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    fn fulltext_search<'a>(
        &'a self,
        group: &'a GroupId,
        query: &'a str,
        limit: usize,
    ) -> StoreFuture<'a, MemoryResult<Vec<ScoredObject>>>;

    /// Cosine similarity search over node embeddings.
    ///
    /// `use_index` selects the vector index over an exhaustive scan.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    fn vector_search<'a>(
        &'a self,
        group: &'a GroupId,
        embedding: &'a [f32],
        limit: usize,
        min_score: f32,
        use_index: bool,
    ) -> StoreFuture<'a, MemoryResult<Vec<ScoredObject>>>;

    /// Nodes within `max_hops` of nodes whose names match `query`.
    ///
    /// With `as_of`, only links valid at that instant are walked.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    fn traverse<'a>(
        &'a self,
        group: &'a GroupId,
        query: &'a str,
        max_hops: usize,
        as_of: Option<DateTime<Utc>>,
        limit: usize,
    ) -> StoreFuture<'a, MemoryResult<Vec<ScoredObject>>>;

    /// First current link `source -[relation]-> target`.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    fn find_current_link<'a>(
        &'a self,
        group: &'a GroupId,
        source: ObjectId,
        relation_type: &'a str,
        target: ObjectId,
    ) -> StoreFuture<'a, MemoryResult<Option<MemoryLink>>>;

    /// Links touching a node, oldest first.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    fn links_for<'a>(
        &'a self,
        group: &'a GroupId,
        uuid: ObjectId,
        current_only: bool,
    ) -> StoreFuture<'a, MemoryResult<Vec<MemoryLink>>>;

    /// Set `invalid_at` on a current link. Returns false if none was updated.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    fn invalidate_link<'a>(
        &'a self,
        group: &'a GroupId,
        uuid: LinkId,
        at: DateTime<Utc>,
    ) -> StoreFuture<'a, MemoryResult<bool>>;

    /// Remove a node; with `cascade`, also every link touching it.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    fn delete_object<'a>(
        &'a self,
        group: &'a GroupId,
        uuid: ObjectId,
        cascade: bool,
    ) -> StoreFuture<'a, MemoryResult<DeleteOutcome>>;

    /// Node and link totals.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    fn counts<'a>(&'a self, group: &'a GroupId) -> StoreFuture<'a, MemoryResult<GraphCounts>>;
}

/// Graph store availability, resolved once at construction.
#[derive(Clone)]
pub enum GraphConnection {
    /// A usable store.
    Connected(Arc<dyn GraphStore>),
    /// No store; every consumer degrades.
    Unavailable {
        /// Why the store is missing.
        reason: String,
    },
}

impl GraphConnection {
    /// Wrap a store.
    #[must_use]
    pub fn connected(store: Arc<dyn GraphStore>) -> Self {
        Self::Connected(store)
    }

    /// Mark the store as unavailable.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// The store, if connected.
    #[must_use]
    pub fn store(&self) -> Option<&Arc<dyn GraphStore>> {
        match self {
            Self::Connected(store) => Some(store),
            Self::Unavailable { .. } => None,
        }
    }

    /// The store, or [`MemoryError::GraphUnavailable`].
    ///
    /// # Errors
    /// Returns an error when unavailable.
    pub fn require(&self) -> MemoryResult<&Arc<dyn GraphStore>> {
        match self {
            Self::Connected(store) => Ok(store),
            Self::Unavailable { reason } => Err(MemoryError::GraphUnavailable(reason.clone())),
        }
    }

    /// Whether a store is connected.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }
}

impl std::fmt::Debug for GraphConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected(_) => f.write_str("GraphConnection::Connected"),
            Self::Unavailable { reason } => write!(f, "GraphConnection::Unavailable({reason})"),
        }
    }
}
