//! Graph memory orchestration module.

pub mod core;

pub use core::{GraphMemory, GraphMemoryParts};
