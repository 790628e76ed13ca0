//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::memory::core::config::GraphMemoryConfig;
use crate::memory::core::errors::MemoryResult;
use crate::memory::core::ids::GroupId;
use crate::memory::engine::GraphMemory;

/// Shared application state.
pub struct AppState {
    /// Graph memory, `None` when the subsystem is disabled.
    pub memory: Option<GraphMemory>,
    /// Partition used when a request names none.
    pub default_group: GroupId,
}

impl AppState {
    /// Build state from configuration.
    ///
    /// # Errors
    /// Returns an error if the graph memory cannot be wired.
    pub async fn from_config(config: GraphMemoryConfig) -> MemoryResult<Arc<Self>> {
        let default_group = config.default_group_id.clone();
        let memory = GraphMemory::from_config(config).await?;
        Ok(Self::with_memory(memory, default_group))
    }

    /// Wrap an already built graph memory.
    #[must_use]
    pub fn with_memory(memory: Option<GraphMemory>, default_group: GroupId) -> Arc<Self> {
        Arc::new(Self {
            memory,
            default_group,
        })
    }
}
