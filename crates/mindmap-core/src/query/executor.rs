// Query Executor - full scan, filter, order, page, then collect incident edges.

use super::ast::{QueryPlan, SortDirection};
use super::eval::{matches_pattern, order_values, resolve_field, ConditionEvaluator};
use super::optimizer::OptimizationHints;
use crate::storage::graph::GraphStore;
use mindmap_common::{Edge, Node, QueryError, QueryResult, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One projected RETURN row: column name -> value.
pub type Row = BTreeMap<String, Value>;

/// Wall-clock budget for a single query.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self { started: Instant::now(), budget }
    }

    fn check(&self) -> Result<(), QueryError> {
        if self.started.elapsed() >= self.budget {
            Err(QueryError::DeadlineExceeded(self.budget))
        } else {
            Ok(())
        }
    }
}

pub struct QueryExecutor {
    graph_store: Arc<dyn GraphStore>,
}

impl QueryExecutor {
    pub fn new(graph_store: Arc<dyn GraphStore>) -> Self {
        Self { graph_store }
    }

    pub fn graph_store(&self) -> &Arc<dyn GraphStore> {
        &self.graph_store
    }

    /// Run `plan` against a snapshot of the graph. `hints` only feed the debug
    /// log; they never change the result.
    pub fn execute(
        &self,
        plan: &QueryPlan,
        hints: &OptimizationHints,
        deadline: Option<Deadline>,
    ) -> Result<QueryResult, QueryError> {
        let started = Instant::now();
        let check_deadline = || deadline.as_ref().map_or(Ok(()), Deadline::check);
        check_deadline()?;

        let graph = self.graph_store.get_graph()?;
        let evaluator = plan.where_clause.as_ref()
            .map(ConditionEvaluator::new)
            .transpose()?;

        // Intersection of all node patterns, then the WHERE filter.
        let mut candidates: Vec<&Node> = Vec::new();
        for node in graph.nodes() {
            check_deadline()?;
            if !plan.node_patterns.iter().all(|p| matches_pattern(node, p)) {
                continue;
            }
            if let Some(eval) = &evaluator {
                if !eval.evaluate(node) {
                    continue;
                }
            }
            candidates.push(node);
        }

        if let Some(order) = &plan.order_by {
            let mut keyed: Vec<(Vec<Option<Value>>, &Node)> = candidates.into_iter()
                .map(|n| (order.items.iter().map(|i| resolve_field(n, &i.expression)).collect(), n))
                .collect();

            // Stable: ties keep scan order.
            keyed.sort_by(|(a, _), (b, _)| {
                for (i, item) in order.items.iter().enumerate() {
                    let ord = order_values(a[i].as_ref(), b[i].as_ref());
                    let ord = match item.direction {
                        SortDirection::Asc => ord,
                        SortDirection::Desc => ord.reverse(),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
            candidates = keyed.into_iter().map(|(_, n)| n).collect();
        }

        let skip = plan.skip.unwrap_or(0);
        let limit = plan.limit.unwrap_or(usize::MAX);
        let nodes: Vec<Node> = candidates.into_iter().skip(skip).take(limit).cloned().collect();

        check_deadline()?;
        let node_ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let edges: Vec<Edge> = graph.edges()
            .filter(|e| node_ids.contains(e.source.as_str()) || node_ids.contains(e.target.as_str()))
            .cloned()
            .collect();

        let query_time = started.elapsed().as_millis() as u64;
        tracing::debug!(
            "Executed query: {} nodes, {} edges in {}ms (estimated cost={}, hints={:?})",
            nodes.len(),
            edges.len(),
            query_time,
            hints.estimated_cost,
            hints.index_hints
        );

        Ok(QueryResult {
            total_matches: nodes.len(),
            nodes,
            edges,
            query_time,
            cached: false,
        })
    }

    /// Non-aggregated projection of the RETURN items. A bare pattern variable
    /// or `*` projects the node id.
    pub fn project(plan: &QueryPlan, nodes: &[Node]) -> Result<Vec<Row>, QueryError> {
        let Some(clause) = &plan.return_clause else {
            return Ok(nodes.iter()
                .map(|n| Row::from([("id".to_string(), Value::Str(n.id.clone()))]))
                .collect());
        };

        if let Some(item) = clause.items.iter().find(|i| i.aggregate.is_some()) {
            return Err(QueryError::Evaluation(format!(
                "aggregate {:?}({}) is not supported by the core executor",
                item.aggregate, item.expression
            )));
        }

        let variables: HashSet<&str> = plan.node_patterns.iter()
            .filter_map(|p| p.variable.as_deref())
            .collect();

        Ok(nodes.iter()
            .map(|node| {
                clause.items.iter()
                    .map(|item| {
                        let value = if item.expression == "*" || variables.contains(item.expression.as_str()) {
                            Value::Str(node.id.clone())
                        } else {
                            resolve_field(node, &item.expression).unwrap_or(Value::Null)
                        };
                        (item.column_name().to_string(), value)
                    })
                    .collect()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::optimizer::QueryOptimizer;
    use crate::query::parser::parse;
    use crate::storage::graph::InMemoryGraphStore;
    use mindmap_common::QueryParams;

    fn store() -> Arc<InMemoryGraphStore> {
        let store = Arc::new(InMemoryGraphStore::new());
        store.add_node(Node::new("a", "file", "index.ts").with_path("/src/index.ts").with_confidence(0.5)).unwrap();
        store.add_node(Node::new("b", "function", "main").with_path("/src/index.ts").with_confidence(0.9)).unwrap();
        store.add_node(Node::new("c", "function", "TestRunner").with_path("/test/run.ts").with_confidence(0.7)).unwrap();
        store.add_node(Node::new("d", "class", "Widget").with_path("/src/widget.ts").with_confidence(0.3)).unwrap();
        store.add_node(Node::new("e", "function", "helper").with_path("/src/util.ts").with_confidence(0.8)).unwrap();
        store.add_edge(Edge::new("e1", "a", "b", "contains")).unwrap();
        store.add_edge(Edge::new("e2", "b", "c", "calls")).unwrap();
        store.add_edge(Edge::new("e3", "d", "e", "uses")).unwrap();
        store
    }

    fn run(query: &str) -> Result<QueryResult, QueryError> {
        let plan = parse(query, &QueryParams::new())?;
        let hints = QueryOptimizer::new().optimize(&plan);
        QueryExecutor::new(store()).execute(&plan, &hints, None)
    }

    fn ids(result: &QueryResult) -> Vec<&str> {
        result.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn test_label_filter_and_incident_edges() {
        let result = run("MATCH (n:file) RETURN n.name").unwrap();
        assert_eq!(ids(&result), vec!["a"]);
        assert_eq!(result.total_matches, 1);
        assert_eq!(result.edges.len(), 1);
        assert_eq!(result.edges[0].id, "e1");
        assert!(!result.cached);
    }

    #[test]
    fn test_where_contains_matches_case_insensitively() {
        let result = run("MATCH (n) WHERE name CONTAINS 'test'").unwrap();
        assert_eq!(ids(&result), vec!["c"]);
    }

    #[test]
    fn test_order_by_desc_with_limit_and_skip() {
        let top = run("MATCH (n) ORDER BY confidence DESC LIMIT 2").unwrap();
        assert_eq!(ids(&top), vec!["b", "e"]);

        let skipped = run("MATCH (n) ORDER BY confidence DESC SKIP 1 LIMIT 2").unwrap();
        assert_eq!(ids(&skipped), vec!["e", "c"]);
    }

    #[test]
    fn test_order_is_stable_for_ties() {
        let result = run("MATCH (n) ORDER BY n.path").unwrap();
        // a and b share a path and keep scan order.
        assert_eq!(ids(&result), vec!["a", "b", "e", "d", "c"]);
    }

    #[test]
    fn test_order_by_mixed_and_missing_keys() {
        let store = Arc::new(InMemoryGraphStore::new());
        store.add_node(Node::new("s", "file", "s").with_metadata("rank", "high")).unwrap();
        store.add_node(Node::new("m", "file", "m")).unwrap();
        store.add_node(Node::new("i2", "file", "i2").with_metadata("rank", 2i64)).unwrap();
        store.add_node(Node::new("f", "file", "f").with_metadata("rank", 1.5)).unwrap();
        store.add_node(Node::new("i1", "file", "i1").with_metadata("rank", 1i64)).unwrap();

        let plan = parse("MATCH (n) ORDER BY rank", &QueryParams::new()).unwrap();
        let hints = QueryOptimizer::new().optimize(&plan);
        let executor = QueryExecutor::new(store);

        let asc = executor.execute(&plan, &hints, None).unwrap();
        assert_eq!(ids(&asc), vec!["i1", "f", "i2", "s", "m"]);

        let plan = parse("MATCH (n) ORDER BY rank DESC", &QueryParams::new()).unwrap();
        let desc = executor.execute(&plan, &hints, None).unwrap();
        assert_eq!(ids(&desc), vec!["m", "s", "i2", "f", "i1"]);
    }

    #[test]
    fn test_multiple_patterns_intersect() {
        let result = run("MATCH (f:function), (g {path: '/src/index.ts'})").unwrap();
        assert_eq!(ids(&result), vec!["b"]);
    }

    #[test]
    fn test_skip_past_end_is_empty() {
        let result = run("MATCH (n) SKIP 10").unwrap();
        assert!(result.nodes.is_empty());
        assert!(result.edges.is_empty());
    }

    #[test]
    fn test_invalid_regex_aborts_query() {
        let err = run("MATCH (n) WHERE n.name REGEX '(['").unwrap_err();
        assert!(matches!(err, QueryError::Evaluation(_)));
    }

    #[test]
    fn test_deadline_exceeded() {
        let plan = parse("MATCH (n)", &QueryParams::new()).unwrap();
        let hints = QueryOptimizer::new().optimize(&plan);
        let err = QueryExecutor::new(store())
            .execute(&plan, &hints, Some(Deadline::after(Duration::ZERO)))
            .unwrap_err();
        assert!(matches!(err, QueryError::DeadlineExceeded(_)));
    }

    #[test]
    fn test_projection() {
        let plan = parse("MATCH (n:function) RETURN n, n.name AS fn, n.missing", &QueryParams::new()).unwrap();
        let hints = QueryOptimizer::new().optimize(&plan);
        let result = QueryExecutor::new(store()).execute(&plan, &hints, None).unwrap();
        let rows = QueryExecutor::project(&plan, &result.nodes).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].get("n"), Some(&Value::Str("b".into())));
        assert_eq!(rows[0].get("fn"), Some(&Value::Str("main".into())));
        assert_eq!(rows[0].get("n.missing"), Some(&Value::Null));
    }

    #[test]
    fn test_projection_rejects_aggregates() {
        let plan = parse("MATCH (n) RETURN count(n)", &QueryParams::new()).unwrap();
        let err = QueryExecutor::project(&plan, &[]).unwrap_err();
        assert!(matches!(err, QueryError::Evaluation(_)));
    }
}
