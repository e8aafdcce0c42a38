//! Read-side view of staged batches and loaded data versions.
//!
//! The `try_*` functions return the cause of a failure. The plain functions
//! log it and fall back to an empty or zero result, so callers see "no data"
//! whether the backend is empty or unreachable.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::batch::{group_batches, Batch, DataVersion, StagedObjectCounts};
use crate::config::Config;
use crate::storage::{ObjectStore, StorageError};
use crate::warehouse::{Warehouse, WarehouseError};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to list staged objects: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to query warehouse: {0}")]
    Warehouse(#[from] WarehouseError),
}

/// Row count of one raw table or view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    pub name: String,
    pub rows: u64,
    pub is_view: bool,
}

pub struct BatchRegistry {
    store: Arc<dyn ObjectStore>,
    warehouse: Arc<dyn Warehouse>,
    raw_prefix: String,
    version_table: String,
    markers: Vec<String>,
    raw_tables: Vec<String>,
    final_view: Option<String>,
}

impl BatchRegistry {
    pub fn new(config: &Config, store: Arc<dyn ObjectStore>, warehouse: Arc<dyn Warehouse>) -> Self {
        Self {
            store,
            warehouse,
            raw_prefix: config.storage.raw_prefix.clone(),
            version_table: config.warehouse.version_table.clone(),
            markers: config.sources.iter().map(|s| s.dataset_id.clone()).collect(),
            raw_tables: config.raw_tables(),
            final_view: config.views.last().map(|v| v.name.clone()),
        }
    }

    pub async fn try_list_batches(&self) -> Result<Vec<Batch>, RegistryError> {
        let keys = self.store.list_objects(&self.raw_prefix).await?;
        let batches = group_batches(keys.iter().map(String::as_str));
        debug!(objects = keys.len(), batches = batches.len(), "Listed batches");
        Ok(batches)
    }

    /// Staged batches, most recent first.
    pub async fn list_available_batches(&self) -> Vec<Batch> {
        match self.try_list_batches().await {
            Ok(batches) => batches,
            Err(e) => {
                warn!(error = %e, "Batch listing failed, reporting none");
                Vec::new()
            }
        }
    }

    pub async fn try_list_versions(&self) -> Result<Vec<DataVersion>, RegistryError> {
        Ok(self.warehouse.distinct_versions(&self.version_table).await?)
    }

    /// Data versions loaded in the version table, most recent first.
    pub async fn list_available_versions(&self) -> Vec<DataVersion> {
        match self.try_list_versions().await {
            Ok(versions) => versions,
            Err(e) => {
                warn!(error = %e, table = %self.version_table, "Version listing failed, reporting none");
                Vec::new()
            }
        }
    }

    pub async fn try_count_staged_objects(&self) -> Result<StagedObjectCounts, RegistryError> {
        let keys = self.store.list_objects(&self.raw_prefix).await?;
        Ok(StagedObjectCounts::tally(
            keys.iter().map(String::as_str),
            &self.markers,
        ))
    }

    /// Staged objects per source dataset id.
    pub async fn count_staged_objects(&self) -> StagedObjectCounts {
        match self.try_count_staged_objects().await {
            Ok(counts) => counts,
            Err(e) => {
                warn!(error = %e, "Object count failed, reporting zero");
                StagedObjectCounts::zero(&self.markers)
            }
        }
    }

    /// Row counts of the raw tables and the final view; each failed count reads as 0.
    pub async fn table_row_counts(&self) -> Vec<TableStats> {
        let mut stats = Vec::with_capacity(self.raw_tables.len() + 1);
        let tables = self.raw_tables.iter().map(|t| (t, false));
        let views = self.final_view.iter().map(|v| (v, true));

        for (name, is_view) in tables.chain(views) {
            let rows = match self.warehouse.row_count(name).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(error = %e, table = %name, "Row count failed, reporting 0");
                    0
                }
            };
            stats.push(TableStats {
                name: name.clone(),
                rows,
                is_view,
            });
        }
        stats
    }

    /// The most recent batch, from a fresh listing.
    pub async fn latest_batch(&self) -> Result<Option<Batch>, RegistryError> {
        Ok(self.try_list_batches().await?.into_iter().next())
    }

    /// The most recent data version, from a fresh query.
    pub async fn latest_version(&self) -> Result<Option<DataVersion>, RegistryError> {
        Ok(self.try_list_versions().await?.into_iter().next())
    }
}
