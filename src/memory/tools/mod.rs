//! Agent-facing tools for direct memory management.

pub mod direct;
pub mod registry;

pub use direct::MemoryTools;
pub use registry::{ToolDefinition, dispatch, tool_definitions};
