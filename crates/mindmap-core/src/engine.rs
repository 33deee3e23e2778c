use crate::cache::{CacheStats, EnhancedCacheStats, ResultCache};
use crate::query::executor::{Deadline, QueryExecutor, Row};
use crate::query::optimizer::{OptimizationHints, QueryOptimizer};
use crate::query::parser::parse;
use crate::saved::{JsonFilePersistence, SavedQuery, SavedQueryRegistry};
use crate::storage::graph::GraphStore;
use anyhow::Result;
use mindmap_common::config::AppConfig;
use mindmap_common::{QueryError, QueryParams, QueryResult};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Caller context of plain `execute_query` calls.
const EMPTY_CONTEXT: &str = "{}";

#[derive(Clone)]
pub struct QueryEngine {
    executor: Arc<QueryExecutor>,
    optimizer: QueryOptimizer,
    cache: Arc<ResultCache>,
    saved: Arc<SavedQueryRegistry>,
    default_timeout: Option<Duration>,
}

impl QueryEngine {
    pub fn new(graph_store: Arc<dyn GraphStore>, config: &AppConfig) -> Self {
        let saved = match &config.saved_queries.path {
            Some(path) => SavedQueryRegistry::new(Arc::new(JsonFilePersistence::new(path))),
            None => SavedQueryRegistry::in_memory(),
        };

        Self {
            executor: Arc::new(QueryExecutor::new(graph_store)),
            optimizer: QueryOptimizer::new(),
            cache: Arc::new(ResultCache::new(config.cache.clone())),
            saved: Arc::new(saved),
            default_timeout: config.query.default_timeout_ms.map(Duration::from_millis),
        }
    }

    /// Build an engine and restore any persisted saved queries.
    pub async fn open(graph_store: Arc<dyn GraphStore>, config: &AppConfig) -> Result<Self> {
        let engine = Self::new(graph_store, config);
        engine.saved.load().await?;
        Ok(engine)
    }

    pub fn graph_store(&self) -> &Arc<dyn GraphStore> {
        self.executor.graph_store()
    }

    pub async fn execute_query(
        &self,
        query: &str,
        params: Option<&QueryParams>,
    ) -> Result<QueryResult, QueryError> {
        self.run(query, params, EMPTY_CONTEXT, self.default_timeout.map(Deadline::after)).await
    }

    /// Execute `query` on behalf of a caller whose working context (a JSON
    /// object such as `{"type": .., "activeFiles": [..]}`) lets the cache
    /// reuse a result stored for a similar context. Parameters must still
    /// match exactly.
    pub async fn execute_query_in_context(
        &self,
        query: &str,
        params: Option<&QueryParams>,
        context: &str,
    ) -> Result<QueryResult, QueryError> {
        self.run(query, params, context, self.default_timeout.map(Deadline::after)).await
    }

    pub async fn execute_query_with_deadline(
        &self,
        query: &str,
        params: Option<&QueryParams>,
        budget: Duration,
    ) -> Result<QueryResult, QueryError> {
        self.run(query, params, EMPTY_CONTEXT, Some(Deadline::after(budget))).await
    }

    async fn run(
        &self,
        query: &str,
        params: Option<&QueryParams>,
        context: &str,
        deadline: Option<Deadline>,
    ) -> Result<QueryResult, QueryError> {
        let started = Instant::now();
        let empty = QueryParams::new();
        let params = params.unwrap_or(&empty);

        if let Some(mut cached) = self.cache.get_with_params(query, params, context).await {
            cached.query_time = started.elapsed().as_millis() as u64;
            return Ok(cached);
        }

        let mut result = self.execute_uncached(query, params, deadline)?;
        result.query_time = started.elapsed().as_millis() as u64;
        self.cache.set_with_params(query, params, context, &result).await;

        tracing::debug!(
            "Query returned {} nodes in {}ms: {}",
            result.total_matches,
            result.query_time,
            query.trim()
        );
        Ok(result)
    }

    fn execute_uncached(
        &self,
        query: &str,
        params: &QueryParams,
        deadline: Option<Deadline>,
    ) -> Result<QueryResult, QueryError> {
        let plan = parse(query, params)?;
        let hints = self.optimizer.optimize(&plan);
        self.executor.execute(&plan, &hints, deadline)
    }

    /// Execute `query` and project its RETURN items into rows.
    pub async fn query_rows(
        &self,
        query: &str,
        params: Option<&QueryParams>,
    ) -> Result<Vec<Row>, QueryError> {
        let empty = QueryParams::new();
        let plan = parse(query, params.unwrap_or(&empty))?;
        let result = self.execute_query(query, params).await?;
        QueryExecutor::project(&plan, &result.nodes)
    }

    pub fn explain(
        &self,
        query: &str,
        params: Option<&QueryParams>,
    ) -> Result<OptimizationHints, QueryError> {
        let empty = QueryParams::new();
        let plan = parse(query, params.unwrap_or(&empty))?;
        Ok(self.optimizer.optimize(&plan))
    }

    // --- Saved queries ---

    pub async fn save_query(
        &self,
        name: &str,
        description: &str,
        query: &str,
        parameters: Option<QueryParams>,
    ) -> String {
        self.saved.save_query(name, description, query, parameters).await
    }

    pub fn get_saved_queries(&self) -> Vec<SavedQuery> {
        self.saved.list()
    }

    pub fn get_saved_query(&self, id: &str) -> Option<SavedQuery> {
        self.saved.get(id)
    }

    pub async fn execute_saved_query(
        &self,
        id: &str,
        params: Option<&QueryParams>,
    ) -> Result<QueryResult, QueryError> {
        let (query, merged) = self.saved.record_use(id, params).await?;
        self.execute_query(&query, Some(&merged)).await
    }

    pub async fn delete_saved_query(&self, id: &str) -> bool {
        self.saved.delete(id).await
    }

    // --- Cache management ---

    pub async fn get_cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub async fn get_enhanced_stats(&self) -> EnhancedCacheStats {
        self.cache.enhanced_stats().await
    }

    /// Drop cached results touching any of `paths`, or everything when `None`.
    pub async fn invalidate(&self, paths: Option<&[String]>) -> usize {
        self.cache.invalidate(paths).await
    }

    pub async fn cleanup_cache(&self) -> usize {
        self.cache.cleanup().await
    }

    pub async fn warm_cache(&self) -> usize {
        self.cache
            .warm_cache(|query, params| async move {
                self.execute_uncached(&query, &params, self.default_timeout.map(Deadline::after))
            })
            .await
    }

    pub async fn close(&self) {
        self.cache.clear().await;
        tracing::info!("Query engine closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::graph::InMemoryGraphStore;
    use mindmap_common::config::CacheConfig;
    use mindmap_common::{Edge, Node};
    use serde_json::json;
    use tempfile::tempdir;

    fn sample_store() -> Arc<InMemoryGraphStore> {
        let store = Arc::new(InMemoryGraphStore::new());
        store.add_node(Node::new("A", "file", "index.ts").with_path("/src/index.ts")).unwrap();
        store.add_node(Node::new("B", "function", "main").with_path("/src/index.ts")).unwrap();
        store.add_edge(Edge::new("e1", "A", "B", "contains")).unwrap();
        store
    }

    fn engine() -> QueryEngine {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        QueryEngine::new(sample_store(), &AppConfig::default())
    }

    fn case_store() -> Arc<InMemoryGraphStore> {
        let store = Arc::new(InMemoryGraphStore::new());
        store.add_node(Node::new("A", "class", "Main")).unwrap();
        store.add_node(Node::new("B", "class", "main")).unwrap();
        store
    }

    #[tokio::test]
    async fn test_query_then_cached_repeat() {
        let engine = engine();

        let first = engine.execute_query("MATCH (n:file) RETURN n.name", None).await.unwrap();
        assert_eq!(first.nodes.len(), 1);
        assert_eq!(first.nodes[0].id, "A");
        assert_eq!(first.edges.len(), 1);
        assert_eq!(first.edges[0].id, "e1");
        assert_eq!(first.total_matches, 1);
        assert!(!first.cached);

        let second = engine.execute_query("MATCH (n:file) RETURN n.name", None).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.nodes, first.nodes);
        assert_eq!(second.edges, first.edges);

        let stats = engine.get_cache_stats().await;
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.total_entries, 1);
    }

    #[tokio::test]
    async fn test_params_are_part_of_cache_key() {
        let engine = engine();
        let mut params = QueryParams::new();
        params.insert("name".into(), json!("main"));

        let by_param = engine.execute_query("MATCH (n {name: $name})", Some(&params)).await.unwrap();
        assert_eq!(by_param.nodes[0].id, "B");

        params.insert("name".into(), json!("index.ts"));
        let other = engine.execute_query("MATCH (n {name: $name})", Some(&params)).await.unwrap();
        assert!(!other.cached);
        assert_eq!(other.nodes[0].id, "A");
    }

    #[tokio::test]
    async fn test_literals_differing_in_case_are_not_shared() {
        let engine = QueryEngine::new(case_store(), &AppConfig::default());

        let upper = engine.execute_query("MATCH (n) WHERE n.name = 'Main'", None).await.unwrap();
        assert_eq!(upper.nodes.len(), 1);
        assert_eq!(upper.nodes[0].id, "A");

        let lower = engine.execute_query("MATCH (n) WHERE n.name = 'main'", None).await.unwrap();
        assert!(!lower.cached);
        assert_eq!(lower.nodes.len(), 1);
        assert_eq!(lower.nodes[0].id, "B");

        // Whitespace differences still share an entry.
        let spaced = engine.execute_query("MATCH (n)  WHERE n.name = 'main' ", None).await.unwrap();
        assert!(spaced.cached);
        assert_eq!(spaced.nodes[0].id, "B");
    }

    #[tokio::test]
    async fn test_distinct_params_never_share_a_result() {
        let engine = QueryEngine::new(case_store(), &AppConfig::default());
        let query = "MATCH (n {type: $type}) WHERE n.name = $name";

        let mut params = QueryParams::new();
        params.insert("type".into(), json!("class"));
        params.insert("name".into(), json!("Main"));
        let first = engine.execute_query(query, Some(&params)).await.unwrap();
        assert_eq!(first.nodes[0].id, "A");

        params.insert("name".into(), json!("main"));
        let second = engine.execute_query(query, Some(&params)).await.unwrap();
        assert!(!second.cached);
        assert_eq!(second.nodes.len(), 1);
        assert_eq!(second.nodes[0].id, "B");
        assert_eq!(engine.get_enhanced_stats().await.similarity_hits, 0);
    }

    #[tokio::test]
    async fn test_similar_caller_context_reuses_result() {
        let engine = engine();
        let stored = json!({"type": "search", "activeFiles": ["/src/index.ts"], "sessionGoals": ["refactor"]});
        let close = json!({"type": "search", "activeFiles": ["/src/index.ts"], "sessionGoals": ["refactor", "test"]});

        let first = engine
            .execute_query_in_context("MATCH (n:file)", None, &stored.to_string())
            .await
            .unwrap();
        assert!(!first.cached);

        let second = engine
            .execute_query_in_context("MATCH (n:file)", None, &close.to_string())
            .await
            .unwrap();
        assert!(second.cached);
        assert_eq!(second.nodes, first.nodes);
        assert_eq!(engine.get_enhanced_stats().await.similarity_hits, 1);
    }

    #[tokio::test]
    async fn test_error_kinds() {
        let engine = engine();

        let err = engine.execute_query("FIND (n)", None).await.unwrap_err();
        assert!(matches!(err, QueryError::Parse(_)));

        let err = engine.execute_query("MATCH (n) WHERE n.name REGEX '(['", None).await.unwrap_err();
        assert!(matches!(err, QueryError::Evaluation(_)));

        let err = engine.execute_query("MATCH (n {name: $missing})", None).await.unwrap_err();
        assert!(matches!(err, QueryError::Parse(_)));

        // Failures are never cached.
        assert_eq!(engine.get_cache_stats().await.total_entries, 0);
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let engine = engine();
        let err = engine
            .execute_query_with_deadline("MATCH (n)", None, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::DeadlineExceeded(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_query_rows() {
        let engine = engine();
        let rows = engine.query_rows("MATCH (n:function) RETURN n.name AS fn", None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("fn"), Some(&mindmap_common::Value::Str("main".into())));
    }

    #[tokio::test]
    async fn test_explain() {
        let engine = engine();
        let hints = engine.explain("MATCH (n:file) WHERE n.name = 'index.ts'", None).unwrap();
        assert!(hints.use_index);
        assert!(hints.estimated_cost < 100);
    }

    #[tokio::test]
    async fn test_saved_query_flow() {
        let engine = engine();
        let mut stored = QueryParams::new();
        stored.insert("name".into(), json!("main"));
        let id = engine
            .save_query("by-name", "Lookup by name", "MATCH (n {name: $name})", Some(stored))
            .await;

        let result = engine.execute_saved_query(&id, None).await.unwrap();
        assert_eq!(result.nodes[0].id, "B");

        let mut overrides = QueryParams::new();
        overrides.insert("name".into(), json!("index.ts"));
        let result = engine.execute_saved_query(&id, Some(&overrides)).await.unwrap();
        assert_eq!(result.nodes[0].id, "A");

        let saved = engine.get_saved_query(&id).unwrap();
        assert_eq!(saved.usage_count, 2);
        assert_eq!(engine.get_saved_queries().len(), 1);

        assert!(engine.delete_saved_query(&id).await);
        let err = engine.execute_saved_query(&id, None).await.unwrap_err();
        assert_eq!(err, QueryError::SavedQueryNotFound(id));
    }

    #[tokio::test]
    async fn test_invalidate_by_path() {
        let engine = engine();
        engine.execute_query("MATCH (n:file)", None).await.unwrap();
        engine.execute_query("MATCH (n:function)", None).await.unwrap();

        let removed = engine.invalidate(Some(&["/src/index.ts".to_string()])).await;
        assert_eq!(removed, 2);
        let again = engine.execute_query("MATCH (n:file)", None).await.unwrap();
        assert!(!again.cached);
    }

    #[tokio::test]
    async fn test_disabled_cache_never_hits() {
        let config = AppConfig {
            cache: CacheConfig { enabled: false, ..CacheConfig::default() },
            ..AppConfig::default()
        };
        let engine = QueryEngine::new(sample_store(), &config);
        engine.execute_query("MATCH (n)", None).await.unwrap();
        let second = engine.execute_query("MATCH (n)", None).await.unwrap();
        assert!(!second.cached);
    }

    #[tokio::test]
    async fn test_warm_cache_reexecutes_hot_queries() {
        let engine = engine();
        // One miss, then enough recent hits to mark the pattern hot.
        for _ in 0..5 {
            engine.execute_query("MATCH (n:file)", None).await.unwrap();
        }
        assert_eq!(engine.get_enhanced_stats().await.warmup_candidates, 1);

        engine.invalidate(None).await;
        assert_eq!(engine.warm_cache().await, 1);

        let warmed = engine.execute_query("MATCH (n:file)", None).await.unwrap();
        assert!(warmed.cached);
        assert_eq!(warmed.nodes[0].id, "A");

        engine.close().await;
        assert_eq!(engine.get_cache_stats().await, CacheStats::default());
    }

    #[tokio::test]
    async fn test_open_restores_saved_queries() -> Result<()> {
        let temp_dir = tempdir()?;
        let mut config = AppConfig::default();
        config.saved_queries.path = Some(temp_dir.path().join("saved.json").to_string_lossy().into_owned());

        let id = {
            let engine = QueryEngine::open(sample_store(), &config).await?;
            engine.save_query("files", "", "MATCH (n:file)", None).await
        };

        let reopened = QueryEngine::open(sample_store(), &config).await?;
        let result = reopened.execute_saved_query(&id, None).await?;
        assert_eq!(result.nodes[0].id, "A");
        Ok(())
    }
}
