//! Data warehouse where staged batches are loaded and views are built.
//!
//! The [`Warehouse`] trait is the narrow interface used by the registry and
//! the load/transform stages. [`SqliteWarehouse`] is a local implementation
//! that reads CSV objects from an [`ObjectStore`](crate::storage::ObjectStore).

mod error;
mod sqlite;
mod traits;

pub use error::WarehouseError;
pub use sqlite::SqliteWarehouse;
pub use traits::Warehouse;

/// Column every raw table carries to identify its data version.
pub const VERSION_COLUMN: &str = "extraction_timestamp";
