//! Mock warehouse for testing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::batch::{DataVersion, StagedObject};
use crate::warehouse::{Warehouse, WarehouseError};

/// A recorded `replace_table` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedLoad {
    pub table: String,
    pub objects: Vec<String>,
    pub version: DataVersion,
}

/// A recorded `create_or_replace_view` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedView {
    pub view: String,
    pub sql: String,
    pub success: bool,
}

#[derive(Debug, Default)]
struct MockTable {
    rows: u64,
    versions: Vec<DataVersion>,
}

/// In-memory [`Warehouse`].
///
/// Loading replaces a table with one row per staged object, stamped with the
/// load's version. Views are recorded but not evaluated.
#[derive(Debug, Clone, Default)]
pub struct MockWarehouse {
    tables: Arc<RwLock<HashMap<String, MockTable>>>,
    views: Arc<RwLock<HashMap<String, String>>>,
    loads: Arc<RwLock<Vec<RecordedLoad>>>,
    view_calls: Arc<RwLock<Vec<RecordedView>>>,
    failing_views: Arc<RwLock<HashSet<String>>>,
    fail_loads: Arc<RwLock<bool>>,
    fail_queries: Arc<RwLock<bool>>,
}

impl MockWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a data version as if it had been loaded.
    pub async fn add_version(&self, table: &str, version: DataVersion) {
        let mut tables = self.tables.write().await;
        let entry = tables.entry(table.to_string()).or_default();
        entry.versions.push(version);
        entry.rows += 1;
    }

    pub async fn set_row_count(&self, table: &str, rows: u64) {
        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .rows = rows;
    }

    pub async fn fail_view(&self, view: &str) {
        self.failing_views.write().await.insert(view.to_string());
    }

    pub async fn set_fail_loads(&self, fail: bool) {
        *self.fail_loads.write().await = fail;
    }

    /// Make version and row count queries fail.
    pub async fn set_fail_queries(&self, fail: bool) {
        *self.fail_queries.write().await = fail;
    }

    pub async fn recorded_loads(&self) -> Vec<RecordedLoad> {
        self.loads.read().await.clone()
    }

    pub async fn load_count(&self) -> usize {
        self.loads.read().await.len()
    }

    pub async fn recorded_views(&self) -> Vec<RecordedView> {
        self.view_calls.read().await.clone()
    }

    /// Number of `create_or_replace_view` calls.
    pub async fn view_call_count(&self) -> usize {
        self.view_calls.read().await.len()
    }

    /// SQL of the view as currently defined.
    pub async fn view_sql(&self, view: &str) -> Option<String> {
        self.views.read().await.get(view).cloned()
    }

    async fn check_queries(&self) -> Result<(), WarehouseError> {
        if *self.fail_queries.read().await {
            return Err(WarehouseError::Database(
                "simulated query failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Warehouse for MockWarehouse {
    fn name(&self) -> &str {
        "mock"
    }

    async fn replace_table(
        &self,
        table: &str,
        objects: &[StagedObject],
        version: &DataVersion,
    ) -> Result<u64, WarehouseError> {
        self.loads.write().await.push(RecordedLoad {
            table: table.to_string(),
            objects: objects.iter().map(|o| o.key.clone()).collect(),
            version: *version,
        });
        if *self.fail_loads.read().await {
            return Err(WarehouseError::Database("simulated load failure".to_string()));
        }

        let rows = objects.len() as u64;
        self.tables.write().await.insert(
            table.to_string(),
            MockTable {
                rows,
                versions: vec![*version],
            },
        );
        Ok(rows)
    }

    async fn distinct_versions(&self, table: &str) -> Result<Vec<DataVersion>, WarehouseError> {
        self.check_queries().await?;
        let mut versions = self
            .tables
            .read()
            .await
            .get(table)
            .map(|t| t.versions.clone())
            .unwrap_or_default();
        versions.sort_unstable_by(|a, b| b.cmp(a));
        versions.dedup();
        Ok(versions)
    }

    async fn row_count(&self, table: &str) -> Result<u64, WarehouseError> {
        self.check_queries().await?;
        self.tables
            .read()
            .await
            .get(table)
            .map(|t| t.rows)
            .ok_or_else(|| WarehouseError::Database(format!("no such table: {table}")))
    }

    async fn create_or_replace_view(&self, view: &str, sql: &str) -> Result<(), WarehouseError> {
        let success = !self.failing_views.read().await.contains(view);
        self.view_calls.write().await.push(RecordedView {
            view: view.to_string(),
            sql: sql.to_string(),
            success,
        });
        if !success {
            return Err(WarehouseError::Database(format!(
                "simulated failure creating {view}"
            )));
        }
        self.views
            .write()
            .await
            .insert(view.to_string(), sql.to_string());
        Ok(())
    }
}
