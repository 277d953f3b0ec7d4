use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use microbox_protocol::{KernelError, KernelResult, Store, StoreQuery, StoreRecord};
use serde_json::Value;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

type Namespace = IndexMap<String, Value>;

/// Namespaced JSON documents kept in insertion order.
///
/// Namespaces come into existence on first write. `snapshot` / `restore`
/// move the whole store to and from a JSON file.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    namespaces: Arc<RwLock<IndexMap<String, Namespace>>>,
}

fn matches(key: &str, value: &Value, query: &StoreQuery) -> bool {
    if let Some(prefix) = &query.prefix {
        if !key.starts_with(prefix.as_str()) {
            return false;
        }
    }
    query
        .filter
        .iter()
        .all(|(field, expected)| value.get(field) == Some(expected))
}

fn check_names(namespace: &str, key: &str) -> KernelResult<()> {
    if namespace.trim().is_empty() {
        return Err(KernelError::validation("namespace", "cannot be empty"));
    }
    if key.trim().is_empty() {
        return Err(KernelError::validation("key", "cannot be empty"));
    }
    Ok(())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn select(&self, namespace: &str, query: &StoreQuery) -> KernelResult<Vec<StoreRecord>> {
        let namespaces = self.namespaces.read().await;
        let documents = namespaces
            .get(namespace)
            .ok_or_else(|| KernelError::NotFound(format!("namespace {namespace}")))?;
        Ok(documents
            .iter()
            .filter(|(key, value)| matches(key, value, query))
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|(key, value)| StoreRecord {
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn snapshot(&self, path: &Path) -> KernelResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_vec_pretty(&*self.namespaces.read().await)?;
        fs::write(path, raw).await?;
        debug!("store snapshot written");
        Ok(())
    }

    /// Replace the contents of this store with a snapshot.
    #[instrument(skip(self))]
    pub async fn restore(&self, path: &Path) -> KernelResult<()> {
        let raw = fs::read(path).await?;
        let restored: IndexMap<String, Namespace> = serde_json::from_slice(&raw)?;
        *self.namespaces.write().await = restored;
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    #[instrument(skip(self, value))]
    async fn create(&self, namespace: &str, key: &str, value: Value) -> KernelResult<()> {
        check_names(namespace, key)?;
        let mut namespaces = self.namespaces.write().await;
        let documents = namespaces.entry(namespace.to_owned()).or_default();
        if documents.contains_key(key) {
            return Err(KernelError::AlreadyExists(format!("{namespace}/{key}")));
        }
        documents.insert(key.to_owned(), value);
        Ok(())
    }

    async fn read(&self, namespace: &str, key: &str) -> KernelResult<Value> {
        self.namespaces
            .read()
            .await
            .get(namespace)
            .and_then(|documents| documents.get(key))
            .cloned()
            .ok_or_else(|| KernelError::NotFound(format!("{namespace}/{key}")))
    }

    #[instrument(skip(self, value))]
    async fn update(&self, namespace: &str, key: &str, value: Value) -> KernelResult<()> {
        check_names(namespace, key)?;
        self.namespaces
            .write()
            .await
            .entry(namespace.to_owned())
            .or_default()
            .insert(key.to_owned(), value);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, namespace: &str, key: &str) -> KernelResult<()> {
        self.namespaces
            .write()
            .await
            .get_mut(namespace)
            .and_then(|documents| documents.shift_remove(key))
            .map(|_| ())
            .ok_or_else(|| KernelError::NotFound(format!("{namespace}/{key}")))
    }

    async fn list(&self, namespace: &str, query: &StoreQuery) -> KernelResult<Vec<String>> {
        Ok(self
            .select(namespace, query)
            .await?
            .into_iter()
            .map(|record| record.key)
            .collect())
    }

    async fn query(&self, namespace: &str, query: &StoreQuery) -> KernelResult<Vec<StoreRecord>> {
        self.select(namespace, query).await
    }

    async fn namespaces(&self) -> KernelResult<Vec<String>> {
        Ok(self.namespaces.read().await.keys().cloned().collect())
    }
}
