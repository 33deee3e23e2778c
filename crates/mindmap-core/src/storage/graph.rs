use mindmap_common::{Edge, EdgeId, Node, NodeId, QueryError};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Immutable view of the graph. Iteration follows insertion order so scans are
/// deterministic.
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    nodes: HashMap<NodeId, Node>,
    edges: HashMap<EdgeId, Edge>,
    node_order: Vec<NodeId>,
    edge_order: Vec<EdgeId>,
}

impl GraphSnapshot {
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.node_order.iter().filter_map(move |id| self.nodes.get(id))
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edge_order.iter().filter_map(move |id| self.edges.get(id))
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    fn upsert_node(&mut self, node: Node) {
        if !self.nodes.contains_key(&node.id) {
            self.node_order.push(node.id.clone());
        }
        self.nodes.insert(node.id.clone(), node);
    }

    fn upsert_edge(&mut self, edge: Edge) {
        if !self.edges.contains_key(&edge.id) {
            self.edge_order.push(edge.id.clone());
        }
        self.edges.insert(edge.id.clone(), edge);
    }

    fn remove_node(&mut self, id: &str) -> Option<Node> {
        let removed = self.nodes.remove(id)?;
        self.node_order.retain(|n| n != id);

        // Drop dangling edges along with the node.
        let dangling: Vec<EdgeId> = self.edges.values()
            .filter(|e| e.source == id || e.target == id)
            .map(|e| e.id.clone())
            .collect();
        for edge_id in &dangling {
            self.edges.remove(edge_id);
        }
        self.edge_order.retain(|e| !dangling.contains(e));

        Some(removed)
    }
}

/// Read surface the query engine consumes. Population belongs to the analyzers.
pub trait GraphStore: Send + Sync {
    /// A consistent snapshot of the whole graph.
    fn get_graph(&self) -> Result<Arc<GraphSnapshot>, QueryError>;

    fn get_node(&self, id: &str) -> Result<Option<Node>, QueryError> {
        Ok(self.get_graph()?.node(id).cloned())
    }

    fn find_nodes(&self, predicate: &dyn Fn(&Node) -> bool) -> Result<Vec<Node>, QueryError> {
        Ok(self.get_graph()?.nodes().filter(|n| predicate(n)).cloned().collect())
    }

    fn find_edges(&self, predicate: &dyn Fn(&Edge) -> bool) -> Result<Vec<Edge>, QueryError> {
        Ok(self.get_graph()?.edges().filter(|e| predicate(e)).cloned().collect())
    }
}

/// Single-writer, many-reader in-memory store. Writers copy-on-write the
/// snapshot, so a running query keeps reading the version it started with.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    inner: RwLock<Arc<GraphSnapshot>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, node: Node) -> Result<(), QueryError> {
        self.write(|g| g.upsert_node(node))
    }

    pub fn add_edge(&self, edge: Edge) -> Result<(), QueryError> {
        self.write(|g| g.upsert_edge(edge))
    }

    pub fn remove_node(&self, id: &str) -> Result<Option<Node>, QueryError> {
        let mut removed = None;
        self.write(|g| removed = g.remove_node(id))?;
        Ok(removed)
    }

    pub fn clear(&self) -> Result<(), QueryError> {
        self.write(|g| *g = GraphSnapshot::default())
    }

    fn write(&self, mutate: impl FnOnce(&mut GraphSnapshot)) -> Result<(), QueryError> {
        let mut guard = self.inner.write()
            .map_err(|_| QueryError::Execution("graph store lock poisoned".into()))?;
        mutate(Arc::make_mut(&mut guard));
        Ok(())
    }
}

impl GraphStore for InMemoryGraphStore {
    fn get_graph(&self) -> Result<Arc<GraphSnapshot>, QueryError> {
        let guard = self.inner.read()
            .map_err(|_| QueryError::Execution("graph store lock poisoned".into()))?;
        Ok(Arc::clone(&guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_store() -> InMemoryGraphStore {
        let store = InMemoryGraphStore::new();
        store.add_node(Node::new("a", "file", "index.ts")).unwrap();
        store.add_node(Node::new("b", "function", "main")).unwrap();
        store.add_node(Node::new("c", "function", "helper")).unwrap();
        store.add_edge(Edge::new("e1", "a", "b", "contains")).unwrap();
        store.add_edge(Edge::new("e2", "b", "c", "calls")).unwrap();
        store
    }

    #[test]
    fn test_insertion_order_preserved() {
        let store = sample_store();
        let graph = store.get_graph().unwrap();
        let ids: Vec<&str> = graph.nodes().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_upsert_keeps_position() {
        let store = sample_store();
        store.add_node(Node::new("a", "file", "renamed.ts")).unwrap();
        let graph = store.get_graph().unwrap();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.nodes().next().unwrap().name, "renamed.ts");
    }

    #[test]
    fn test_snapshot_isolated_from_writes() {
        let store = sample_store();
        let before = store.get_graph().unwrap();
        store.add_node(Node::new("d", "class", "Widget")).unwrap();
        assert_eq!(before.node_count(), 3);
        assert_eq!(store.get_graph().unwrap().node_count(), 4);
    }

    #[test]
    fn test_remove_node_drops_incident_edges() {
        let store = sample_store();
        let removed = store.remove_node("b").unwrap();
        assert_eq!(removed.map(|n| n.name), Some("main".to_string()));
        assert_eq!(store.get_graph().unwrap().edge_count(), 0);
    }

    #[test]
    fn test_find_helpers() {
        let store = sample_store();
        let functions = store.find_nodes(&|n| n.node_type == "function").unwrap();
        assert_eq!(functions.len(), 2);
        let calls = store.find_edges(&|e| e.edge_type == "calls").unwrap();
        assert_eq!(calls.len(), 1);
        assert!(store.get_node("zzz").unwrap().is_none());
    }
}
