// Result Cache - memoizes (query, parameters, context) -> QueryResult.
//
// Lookup is exact key first, then the first entry with the same query text and
// parameter bindings whose caller context is similar enough. Entry count,
// memory and TTL are bounded; eviction is LRU by access order.

pub mod frequency;
pub mod similarity;

use frequency::{expand_pattern, normalize_pattern, FrequencyTracker};
use similarity::context_similarity;
use mindmap_common::config::CacheConfig;
use mindmap_common::hashing::hash16;
use mindmap_common::{QueryError, QueryParams, QueryResult};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const WARMUP_MIN_HITS: u64 = 3;
const WARMUP_RECENCY: Duration = Duration::from_secs(5 * 60);
const TOP_PATTERNS_REPORTED: usize = 10;

/// Caller context used for entries produced by cache warm-up.
pub const WARMUP_CONTEXT: &str = "{}";

#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Normalized query text.
    pub query: String,
    /// Parameters substituted into the query; part of the entry's identity.
    pub params: QueryParams,
    /// Canonical JSON of `params`, empty when there are none.
    pub bindings: String,
    /// Raw caller context as supplied to `set`.
    pub context: String,
    pub results: QueryResult,
    pub timestamp: Instant,
    pub hit_count: u64,
    pub last_accessed: Instant,
    pub context_hash: String,
    pub result_size: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.duration_since(self.timestamp) > ttl
    }

    fn references_any_path(&self, paths: &[String]) -> bool {
        let node_match = self.results.nodes.iter()
            .filter_map(|n| n.path.as_deref())
            .any(|p| paths.iter().any(|path| p.contains(path.as_str()) || path.contains(p)));
        node_match || paths.iter().any(|path| self.context.contains(path.as_str()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub hit_rate: f64,
    pub memory_usage: u64,
    pub eviction_count: u64,
    pub total_queries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnhancedCacheStats {
    #[serde(flatten)]
    pub base: CacheStats,
    pub similarity_hits: u64,
    pub tracked_patterns: usize,
    pub warmup_candidates: usize,
    pub top_patterns: Vec<(String, u64)>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// Front is least recently accessed.
    access_order: VecDeque<String>,
    memory_usage: u64,
    eviction_count: u64,
    total_queries: u64,
    cache_hits: u64,
    cache_misses: u64,
    similarity_hits: u64,
    frequency: FrequencyTracker,
    /// Hot pattern -> concrete (query, params) requests observed for it.
    warmup_candidates: HashMap<String, Vec<(String, QueryParams)>>,
}

impl CacheState {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.access_order.iter().position(|k| k == key) {
            self.access_order.remove(pos);
        }
        self.access_order.push_back(key.to_string());
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        if let Some(pos) = self.access_order.iter().position(|k| k == key) {
            self.access_order.remove(pos);
        }
        self.memory_usage = self.memory_usage.saturating_sub(entry.result_size);
        Some(entry)
    }

    fn evict_lru(&mut self) -> bool {
        let Some(key) = self.access_order.pop_front() else {
            return false;
        };
        if let Some(entry) = self.entries.remove(&key) {
            self.memory_usage = self.memory_usage.saturating_sub(entry.result_size);
            self.eviction_count += 1;
            tracing::debug!("Evicted LRU cache entry: {} ({} bytes)", key, entry.result_size);
        }
        true
    }

    /// Record a hit on `key` and return a copy of its result flagged as cached.
    fn hit(&mut self, key: &str, now: Instant, track_warmup: bool) -> Option<QueryResult> {
        let entry = self.entries.get_mut(key)?;

        if track_warmup
            && entry.hit_count >= WARMUP_MIN_HITS
            && now.duration_since(entry.last_accessed) <= WARMUP_RECENCY
        {
            let pattern = normalize_pattern(&entry.query);
            if self.frequency.is_frequent(&pattern) {
                let requests = self.warmup_candidates.entry(pattern).or_default();
                if !requests.iter().any(|(q, p)| *q == entry.query && *p == entry.params) {
                    requests.push((entry.query.clone(), entry.params.clone()));
                }
            }
        }

        entry.hit_count += 1;
        entry.last_accessed = now;
        let mut result = entry.results.clone();
        result.cached = true;

        self.cache_hits += 1;
        self.touch(key);
        Some(result)
    }
}

/// Trimmed query text with whitespace runs outside string literals collapsed
/// to one space. Case is preserved.
pub fn normalize_query(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut pending_space = false;

    for c in query.trim().chars() {
        match quote {
            Some(q) => {
                out.push(c);
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None if c.is_whitespace() => pending_space = true,
            None => {
                if pending_space {
                    out.push(' ');
                    pending_space = false;
                }
                if c == '\'' || c == '"' {
                    quote = Some(c);
                }
                out.push(c);
            }
        }
    }
    out
}

/// Canonical JSON of the parameter map (`BTreeMap` keeps keys sorted).
fn bindings_of(params: &QueryParams) -> String {
    if params.is_empty() {
        return String::new();
    }
    serde_json::to_string(params).unwrap_or_default()
}

fn cache_key(normalized_query: &str, bindings: &str, context: &str) -> String {
    if bindings.is_empty() {
        format!("{}:{}", normalized_query, hash16(context))
    } else {
        format!("{}#{}:{}", normalized_query, hash16(bindings), hash16(context))
    }
}

pub struct ResultCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub async fn get(&self, query: &str, context: &str) -> Option<QueryResult> {
        self.get_with_params(query, &QueryParams::new(), context).await
    }

    /// Look up a parameterized query. The similarity fallback only crosses
    /// caller contexts; entries bound to other parameters never match.
    pub async fn get_with_params(
        &self,
        query: &str,
        params: &QueryParams,
        context: &str,
    ) -> Option<QueryResult> {
        if !self.config.enabled {
            return None;
        }

        let normalized = normalize_query(query);
        let bindings = bindings_of(params);
        let key = cache_key(&normalized, &bindings, context);
        let now = Instant::now();
        let ttl = self.config.ttl();
        let track_warmup = self.config.enable_warmup;

        let mut state = self.state.lock().await;
        state.total_queries += 1;
        if track_warmup {
            state.frequency.record(&normalize_pattern(&normalized));
        }

        // 1. Exact key
        let exact_expired = state.entries.get(&key).map(|e| e.is_expired(now, ttl));
        match exact_expired {
            Some(false) => {
                tracing::debug!("Cache HIT (exact) for {}", key);
                return state.hit(&key, now, track_warmup);
            }
            Some(true) => {
                state.remove(&key);
                tracing::debug!("Cache entry expired: {}", key);
            }
            None => {}
        }

        // 2. Same query and bindings, similar context
        let threshold = self.config.context_similarity_threshold;
        let similar = state.entries.iter()
            .filter(|(_, e)| e.query == normalized && e.bindings == bindings && !e.is_expired(now, ttl))
            .find(|(_, e)| context_similarity(context, &e.context) >= threshold)
            .map(|(k, _)| k.clone());

        if let Some(similar_key) = similar {
            tracing::debug!("Cache HIT (similar context) for {} via {}", key, similar_key);
            state.similarity_hits += 1;
            return state.hit(&similar_key, now, track_warmup);
        }

        state.cache_misses += 1;
        tracing::debug!("Cache MISS for {}", key);
        None
    }

    pub async fn set(&self, query: &str, context: &str, result: &QueryResult) {
        self.set_with_params(query, &QueryParams::new(), context, result).await
    }

    pub async fn set_with_params(
        &self,
        query: &str,
        params: &QueryParams,
        context: &str,
        result: &QueryResult,
    ) {
        if !self.config.enabled {
            return;
        }

        let normalized = normalize_query(query);
        let bindings = bindings_of(params);
        let key = cache_key(&normalized, &bindings, context);
        let result_size = serde_json::to_vec(result).map(|b| b.len() as u64).unwrap_or(0);
        let max_memory = self.config.max_memory_bytes();

        if result_size > max_memory {
            tracing::warn!(
                "Result of {} bytes exceeds cache memory limit of {} bytes; not caching {}",
                result_size, max_memory, key
            );
            return;
        }

        let mut state = self.state.lock().await;
        state.remove(&key);

        while state.memory_usage + result_size > max_memory && state.evict_lru() {}
        if state.entries.len() >= self.config.max_entries {
            state.evict_lru();
        }

        let now = Instant::now();
        let mut stored = result.clone();
        stored.cached = false;
        state.entries.insert(key.clone(), CacheEntry {
            query: normalized,
            params: params.clone(),
            bindings,
            context: context.to_string(),
            results: stored,
            timestamp: now,
            hit_count: 0,
            last_accessed: now,
            context_hash: hash16(context),
            result_size,
        });
        state.access_order.push_back(key);
        state.memory_usage += result_size;
    }

    pub async fn contains(&self, query: &str, context: &str) -> bool {
        self.contains_with_params(query, &QueryParams::new(), context).await
    }

    /// Whether an unexpired entry exists for exactly this key. Does not count
    /// as a lookup.
    pub async fn contains_with_params(&self, query: &str, params: &QueryParams, context: &str) -> bool {
        let key = cache_key(&normalize_query(query), &bindings_of(params), context);
        let now = Instant::now();
        let state = self.state.lock().await;
        state.entries.get(&key).is_some_and(|e| !e.is_expired(now, self.config.ttl()))
    }

    /// Remove entries touching `paths` (or everything when `None`). Returns the
    /// number removed.
    pub async fn invalidate(&self, paths: Option<&[String]>) -> usize {
        let mut state = self.state.lock().await;

        let Some(paths) = paths else {
            let removed = state.entries.len();
            state.entries.clear();
            state.access_order.clear();
            state.memory_usage = 0;
            tracing::info!("Invalidated entire query cache ({} entries)", removed);
            return removed;
        };

        let doomed: Vec<String> = state.entries.iter()
            .filter(|(_, e)| e.references_any_path(paths))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            state.remove(key);
        }

        tracing::info!("Invalidated {} cache entries for paths {:?}", doomed.len(), paths);
        doomed.len()
    }

    /// Purge expired entries, returning how many were removed.
    pub async fn cleanup(&self) -> usize {
        let now = Instant::now();
        let ttl = self.config.ttl();
        let mut state = self.state.lock().await;

        let expired: Vec<String> = state.entries.iter()
            .filter(|(_, e)| e.is_expired(now, ttl))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            state.remove(key);
        }

        if !expired.is_empty() {
            tracing::debug!("Cleaned up {} expired cache entries", expired.len());
        }
        expired.len()
    }

    /// Drop every entry, counter and tracked pattern.
    pub async fn clear(&self) {
        *self.state.lock().await = CacheState::default();
        tracing::info!("Cleared query cache");
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        Self::base_stats(&state)
    }

    pub async fn enhanced_stats(&self) -> EnhancedCacheStats {
        let state = self.state.lock().await;
        EnhancedCacheStats {
            base: Self::base_stats(&state),
            similarity_hits: state.similarity_hits,
            tracked_patterns: state.frequency.tracked(),
            warmup_candidates: state.warmup_candidates.len(),
            top_patterns: state.frequency.top(TOP_PATTERNS_REPORTED),
        }
    }

    fn base_stats(state: &CacheState) -> CacheStats {
        CacheStats {
            total_entries: state.entries.len(),
            hit_rate: if state.total_queries > 0 {
                state.cache_hits as f64 / state.total_queries as f64
            } else {
                0.0
            },
            memory_usage: state.memory_usage,
            eviction_count: state.eviction_count,
            total_queries: state.total_queries,
            cache_hits: state.cache_hits,
            cache_misses: state.cache_misses,
        }
    }

    /// Re-execute and cache the requests behind every warm-up candidate, then
    /// clear the candidate set. Observed requests run with their original text
    /// and parameters; `FILE`/`NUM` patterns also run a few representative
    /// expansions. Returns the number of entries added.
    pub async fn warm_cache<F, Fut>(&self, execute: F) -> usize
    where
        F: Fn(String, QueryParams) -> Fut,
        Fut: Future<Output = Result<QueryResult, QueryError>>,
    {
        let candidates: Vec<(String, Vec<(String, QueryParams)>)> = {
            let mut state = self.state.lock().await;
            state.warmup_candidates.drain().collect()
        };
        if candidates.is_empty() {
            return 0;
        }

        let delay = Duration::from_millis(self.config.warmup_delay_ms);
        let mut warmed = 0;
        let mut first = true;

        for (pattern, mut requests) in candidates {
            for query in expand_pattern(&pattern) {
                if !requests.iter().any(|(q, _)| *q == query) {
                    requests.push((query, QueryParams::new()));
                }
            }

            for (query, params) in requests {
                if self.contains_with_params(&query, &params, WARMUP_CONTEXT).await {
                    continue;
                }
                if !first {
                    tokio::time::sleep(delay).await;
                }
                first = false;

                match execute(query.clone(), params.clone()).await {
                    Ok(result) => {
                        self.set_with_params(&query, &params, WARMUP_CONTEXT, &result).await;
                        warmed += 1;
                    }
                    Err(e) => tracing::debug!("Warm-up query failed for {}: {}", query, e),
                }
            }
        }

        tracing::info!("Cache warm-up added {} entries", warmed);
        warmed
    }
}
