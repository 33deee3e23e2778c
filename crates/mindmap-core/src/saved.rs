use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mindmap_common::{QueryError, QueryParams};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedQuery {
    pub id: String,
    pub name: String,
    pub description: String,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<QueryParams>,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    pub usage_count: u64,
}

/// Storage hook for saved queries. The registry works fully in memory; this
/// only mirrors its contents somewhere durable.
#[async_trait]
pub trait SavedQueryPersistence: Send + Sync {
    async fn load(&self) -> Result<Vec<SavedQuery>>;
    async fn save(&self, queries: &[SavedQuery]) -> Result<()>;
}

pub struct NoopPersistence;

#[async_trait]
impl SavedQueryPersistence for NoopPersistence {
    async fn load(&self) -> Result<Vec<SavedQuery>> {
        Ok(Vec::new())
    }

    async fn save(&self, _queries: &[SavedQuery]) -> Result<()> {
        Ok(())
    }
}

/// Saved queries as a pretty-printed JSON array in a single file.
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}

#[async_trait]
impl SavedQueryPersistence for JsonFilePersistence {
    async fn load(&self) -> Result<Vec<SavedQuery>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }
        let bytes = tokio::fs::read(&self.path).await
            .with_context(|| format!("reading saved queries from {}", self.path.display()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Writes a sibling `.tmp` file and renames it over the target, so a
    /// crash mid-write never leaves a truncated file behind.
    async fn save(&self, queries: &[SavedQuery]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(queries)?;
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, json).await
            .with_context(|| format!("writing saved queries to {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path).await
            .with_context(|| format!("replacing saved queries at {}", self.path.display()))?;
        Ok(())
    }
}

pub struct SavedQueryRegistry {
    queries: DashMap<String, SavedQuery>,
    persistence: Arc<dyn SavedQueryPersistence>,
    /// Serializes snapshot-and-save so an older snapshot never lands last.
    persist_lock: Mutex<()>,
}

impl SavedQueryRegistry {
    pub fn new(persistence: Arc<dyn SavedQueryPersistence>) -> Self {
        Self {
            queries: DashMap::new(),
            persistence,
            persist_lock: Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(NoopPersistence))
    }

    /// Load previously persisted queries, replacing same-id records.
    pub async fn load(&self) -> Result<usize> {
        let loaded = self.persistence.load().await?;
        let count = loaded.len();
        for query in loaded {
            self.queries.insert(query.id.clone(), query);
        }
        tracing::info!("Loaded {} saved queries", count);
        Ok(count)
    }

    pub async fn save_query(
        &self,
        name: &str,
        description: &str,
        query: &str,
        parameters: Option<QueryParams>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        self.queries.insert(id.clone(), SavedQuery {
            id: id.clone(),
            name: name.to_string(),
            description: description.to_string(),
            query: query.to_string(),
            parameters,
            created_at: Utc::now(),
            last_used: None,
            usage_count: 0,
        });
        self.persist().await;
        id
    }

    pub fn get(&self, id: &str) -> Option<SavedQuery> {
        self.queries.get(id).map(|q| q.value().clone())
    }

    /// All saved queries, oldest first.
    pub fn list(&self) -> Vec<SavedQuery> {
        let mut all: Vec<SavedQuery> = self.queries.iter().map(|q| q.value().clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    pub async fn delete(&self, id: &str) -> bool {
        let removed = self.queries.remove(id).is_some();
        if removed {
            self.persist().await;
        }
        removed
    }

    /// Bump usage stats for `id` and return its query text with stored
    /// parameters merged under `overrides` (call-site values win).
    pub async fn record_use(
        &self,
        id: &str,
        overrides: Option<&QueryParams>,
    ) -> Result<(String, QueryParams), QueryError> {
        let resolved = {
            let mut saved = self.queries.get_mut(id)
                .ok_or_else(|| QueryError::SavedQueryNotFound(id.to_string()))?;
            saved.last_used = Some(Utc::now());
            saved.usage_count += 1;

            let mut params = saved.parameters.clone().unwrap_or_default();
            if let Some(overrides) = overrides {
                params.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            (saved.query.clone(), params)
        };
        self.persist().await;
        Ok(resolved)
    }

    async fn persist(&self) {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.list();
        if let Err(e) = self.persistence.save(&snapshot).await {
            tracing::warn!("Failed to persist saved queries: {:?}", e);
        }
    }
}
