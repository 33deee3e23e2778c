pub mod engine;
pub mod storage;
pub mod query;
pub mod cache;
pub mod saved;

pub use engine::QueryEngine;
pub use cache::{CacheStats, EnhancedCacheStats, ResultCache};
pub use saved::{SavedQuery, SavedQueryRegistry};
pub use storage::{GraphStore, InMemoryGraphStore};

// Re-export common types for convenience
pub use mindmap_common::{Edge, Node, QueryError, QueryParams, QueryResult, Value};
