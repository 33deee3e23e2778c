use serde::{Deserialize, Serialize};
use config::{Config, ConfigError, File, Environment};

// --- Constants for Default Configuration ---
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1000;
pub const DEFAULT_CACHE_MAX_MEMORY_MB: u64 = 50;
pub const DEFAULT_CACHE_TTL_MINUTES: u64 = 30;
pub const DEFAULT_CONTEXT_SIMILARITY_THRESHOLD: f64 = 0.8;
pub const DEFAULT_WARMUP_DELAY_MS: u64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Deadline applied by `execute_query` when set.
    #[serde(default)]
    pub default_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub max_memory_mb: u64,
    pub ttl_minutes: u64,
    pub context_similarity_threshold: f64,
    pub enable_warmup: bool,
    pub warmup_delay_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SavedQueryConfig {
    /// JSON file backing the saved-query registry. In-memory only when unset.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub query: QueryConfig,
    pub cache: CacheConfig,
    #[serde(default)]
    pub saved_queries: SavedQueryConfig,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { default_timeout_ms: None }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            max_memory_mb: DEFAULT_CACHE_MAX_MEMORY_MB,
            ttl_minutes: DEFAULT_CACHE_TTL_MINUTES,
            context_similarity_threshold: DEFAULT_CONTEXT_SIMILARITY_THRESHOLD,
            enable_warmup: true,
            warmup_delay_ms: DEFAULT_WARMUP_DELAY_MS,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            query: QueryConfig::default(),
            cache: CacheConfig::default(),
            saved_queries: SavedQueryConfig::default(),
        }
    }
}

impl CacheConfig {
    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_mb * 1024 * 1024
    }

    pub fn ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ttl_minutes * 60)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let s = Config::builder()
            // Default settings
            .set_default("cache.enabled", true)?
            .set_default("cache.max_entries", DEFAULT_CACHE_MAX_ENTRIES as i64)?
            .set_default("cache.max_memory_mb", DEFAULT_CACHE_MAX_MEMORY_MB)?
            .set_default("cache.ttl_minutes", DEFAULT_CACHE_TTL_MINUTES)?
            .set_default("cache.context_similarity_threshold", DEFAULT_CONTEXT_SIMILARITY_THRESHOLD)?
            .set_default("cache.enable_warmup", true)?
            .set_default("cache.warmup_delay_ms", DEFAULT_WARMUP_DELAY_MS)?

            // File: mindmap.toml
            .add_source(File::with_name("mindmap").required(false))

            // Environment: MINDMAP__CACHE__TTL_MINUTES=5 -> cache.ttl_minutes=5
            .add_source(Environment::with_prefix("MINDMAP").separator("__"))

            .build()?;

        s.try_deserialize()
    }
}
