pub mod graph;

pub use graph::{GraphSnapshot, GraphStore, InMemoryGraphStore};
