//! Graph persistence.

pub mod graph_store;
pub mod sqlite_graph_store;
pub mod sqlite_vec_loader;

pub use graph_store::{
    DeleteOutcome, GraphConnection, GraphCounts, GraphStore, ScoredObject, StoreFuture,
};
pub use sqlite_graph_store::SqliteGraphStore;
pub use sqlite_vec_loader::init_sqlite_vec_extension;
