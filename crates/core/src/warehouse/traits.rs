//! Trait definitions for the warehouse module.

use async_trait::async_trait;

use super::error::WarehouseError;
use crate::batch::{DataVersion, StagedObject};

/// A data warehouse holding raw tables and derived views.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Returns the name of this warehouse implementation.
    fn name(&self) -> &str;

    /// Replaces the contents of `table` with the rows of `objects`, every row
    /// stamped with `version` in its `extraction_timestamp` column.
    ///
    /// Returns the number of rows loaded.
    async fn replace_table(
        &self,
        table: &str,
        objects: &[StagedObject],
        version: &DataVersion,
    ) -> Result<u64, WarehouseError>;

    /// Distinct non-null `extraction_timestamp` values of `table`, most recent first.
    async fn distinct_versions(&self, table: &str) -> Result<Vec<DataVersion>, WarehouseError>;

    /// Number of rows in a table or view.
    async fn row_count(&self, table: &str) -> Result<u64, WarehouseError>;

    /// Creates `view` from `sql`, replacing any existing view with that name.
    async fn create_or_replace_view(&self, view: &str, sql: &str) -> Result<(), WarehouseError>;
}
