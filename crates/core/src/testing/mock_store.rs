//! Mock object store for testing.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::storage::{ObjectStore, StorageError};

/// In-memory [`ObjectStore`] with failure injection.
///
/// # Example
///
/// ```rust,ignore
/// use siloflow_core::testing::MockObjectStore;
///
/// let store = MockObjectStore::new();
/// store.insert("raw/ratios__20240115_14-30-05.csv", b"a\n1\n".to_vec()).await;
/// store.set_fail_list(true).await;
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockObjectStore {
    objects: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
    /// Keys passed to `put_object`, in call order.
    puts: Arc<RwLock<Vec<String>>>,
    list_calls: Arc<RwLock<usize>>,
    fail_list: Arc<RwLock<bool>>,
    fail_put: Arc<RwLock<bool>>,
    fail_get: Arc<RwLock<bool>>,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object without recording a put.
    pub async fn insert(&self, key: &str, data: Vec<u8>) {
        self.objects.write().await.insert(key.to_string(), data);
    }

    pub async fn remove(&self, key: &str) {
        self.objects.write().await.remove(key);
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(key).cloned()
    }

    /// Keys written through `put_object`.
    pub async fn recorded_puts(&self) -> Vec<String> {
        self.puts.read().await.clone()
    }

    pub async fn put_count(&self) -> usize {
        self.puts.read().await.len()
    }

    pub async fn list_count(&self) -> usize {
        *self.list_calls.read().await
    }

    pub async fn set_fail_list(&self, fail: bool) {
        *self.fail_list.write().await = fail;
    }

    pub async fn set_fail_put(&self, fail: bool) {
        *self.fail_put.write().await = fail;
    }

    pub async fn set_fail_get(&self, fail: bool) {
        *self.fail_get.write().await = fail;
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    fn name(&self) -> &str {
        "mock"
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        *self.list_calls.write().await += 1;
        if *self.fail_list.read().await {
            return Err(StorageError::Backend("simulated listing failure".to_string()));
        }
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn put_object(&self, key: &str, data: Vec<u8>) -> Result<(), StorageError> {
        self.puts.write().await.push(key.to_string());
        if *self.fail_put.read().await {
            return Err(StorageError::Backend("simulated upload failure".to_string()));
        }
        self.objects.write().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        if *self.fail_get.read().await {
            return Err(StorageError::Backend("simulated download failure".to_string()));
        }
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }
}
