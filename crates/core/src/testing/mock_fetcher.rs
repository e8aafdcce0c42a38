//! Mock source fetcher for testing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::config::SourceConfig;
use crate::fetcher::{FetchError, SourceFetcher};

const DEFAULT_BODY: &[u8] = b"symbol,value\nAAA,1\nBBB,2\n";

/// [`SourceFetcher`] returning canned content per source name.
#[derive(Debug, Clone, Default)]
pub struct MockFetcher {
    bodies: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    failing: Arc<RwLock<HashSet<String>>>,
    /// Source names fetched, in call order.
    calls: Arc<RwLock<Vec<String>>>,
    /// Simulated download time per fetch.
    delay: Arc<RwLock<Duration>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_body(&self, source: &str, body: impl Into<Vec<u8>>) {
        self.bodies
            .write()
            .await
            .insert(source.to_string(), body.into());
    }

    /// Make every fetch of `source` fail.
    pub async fn fail_source(&self, source: &str) {
        self.failing.write().await.insert(source.to_string());
    }

    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    pub async fn recorded_fetches(&self) -> Vec<String> {
        self.calls.read().await.clone()
    }

    pub async fn fetch_count(&self) -> usize {
        self.calls.read().await.len()
    }
}

#[async_trait]
impl SourceFetcher for MockFetcher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(&self, source: &SourceConfig) -> Result<Vec<u8>, FetchError> {
        self.calls.write().await.push(source.name.clone());
        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.read().await.contains(&source.name) {
            return Err(FetchError::HttpStatus {
                status: 503,
                message: "simulated outage".to_string(),
            });
        }
        Ok(self
            .bodies
            .read()
            .await
            .get(&source.name)
            .cloned()
            .unwrap_or_else(|| DEFAULT_BODY.to_vec()))
    }
}
