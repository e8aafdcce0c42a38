//! SQLite-backed warehouse.

use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use polars::prelude::{DataType, ParquetReader, PolarsResult, SerReader, StringChunked};
use rusqlite::{params_from_iter, Connection};
use tracing::{debug, warn};

use super::{Warehouse, WarehouseError, VERSION_COLUMN};
use crate::batch::{DataVersion, StagedObject};
use crate::config::SourceFormat;
use crate::storage::ObjectStore;

/// Rows parsed from one or more staged objects destined for the same table.
/// `None` cells are loaded as NULL.
struct TableData {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

/// Warehouse that keeps raw tables and views in a SQLite database.
///
/// Raw tables are loaded from CSV or Parquet objects read through the object
/// store. Every column is stored as TEXT.
/// Every load drops and recreates the table inside one transaction, so a
/// table always holds exactly one batch.
pub struct SqliteWarehouse {
    conn: Arc<Mutex<Connection>>,
    store: Arc<dyn ObjectStore>,
}

impl SqliteWarehouse {
    /// Open (or create) the database file.
    pub fn new(path: &Path, store: Arc<dyn ObjectStore>) -> Result<Self, WarehouseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| WarehouseError::Database(e.to_string()))?;
            }
        }
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            store,
        })
    }

    /// Create an in-memory warehouse (useful for testing)
    pub fn in_memory(store: Arc<dyn ObjectStore>) -> Result<Self, WarehouseError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            store,
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, WarehouseError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, WarehouseError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| WarehouseError::Database("connection lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| WarehouseError::TaskFailed(e.to_string()))?
    }

    async fn read_objects(&self, objects: &[StagedObject]) -> Result<TableData, WarehouseError> {
        let mut table: Option<TableData> = None;

        for object in objects {
            let format = object
                .extension
                .as_deref()
                .and_then(SourceFormat::from_extension)
                .ok_or_else(|| WarehouseError::UnsupportedFormat {
                    key: object.key.clone(),
                    format: object.extension.clone().unwrap_or_default(),
                })?;

            let bytes = self.store.get_object(&object.key).await?;
            let parsed = match format {
                SourceFormat::Csv => parse_csv(&object.key, &bytes)?,
                SourceFormat::Parquet => parse_parquet(&object.key, bytes)?,
            };

            match table.as_mut() {
                None => table = Some(parsed),
                Some(existing) if existing.columns == parsed.columns => {
                    existing.rows.extend(parsed.rows)
                }
                Some(_) => {
                    return Err(WarehouseError::InvalidData {
                        key: object.key.clone(),
                        reason: "columns differ from other objects of the same table".to_string(),
                    })
                }
            }
        }

        table.ok_or_else(|| WarehouseError::InvalidData {
            key: String::new(),
            reason: "no objects to load".to_string(),
        })
    }
}

fn parse_csv(key: &str, bytes: &[u8]) -> Result<TableData, WarehouseError> {
    let invalid = |reason: String| WarehouseError::InvalidData {
        key: key.to_string(),
        reason,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(bytes);

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| invalid(e.to_string()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    check_columns(key, &columns)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| invalid(e.to_string()))?;
        rows.push(record.iter().map(|v| Some(v.to_string())).collect());
    }

    Ok(TableData { columns, rows })
}

fn parse_parquet(key: &str, bytes: Vec<u8>) -> Result<TableData, WarehouseError> {
    let invalid = |reason: String| WarehouseError::InvalidData {
        key: key.to_string(),
        reason,
    };

    let df = ParquetReader::new(Cursor::new(bytes))
        .finish()
        .map_err(|e| invalid(e.to_string()))?;

    let columns: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();
    check_columns(key, &columns)?;

    let text = df
        .get_columns()
        .iter()
        .map(|column| {
            column
                .as_materialized_series()
                .cast(&DataType::String)
                .and_then(|series| series.str().cloned())
        })
        .collect::<PolarsResult<Vec<StringChunked>>>()
        .map_err(|e| invalid(e.to_string()))?;

    let rows = (0..df.height())
        .map(|i| {
            text.iter()
                .map(|values| values.get(i).map(str::to_string))
                .collect()
        })
        .collect();

    Ok(TableData { columns, rows })
}

fn check_columns(key: &str, columns: &[String]) -> Result<(), WarehouseError> {
    let invalid = |reason: String| WarehouseError::InvalidData {
        key: key.to_string(),
        reason,
    };
    if columns.is_empty() || columns.iter().any(|c| c.is_empty()) {
        return Err(invalid("empty column name".to_string()));
    }
    if columns.iter().any(|c| c.eq_ignore_ascii_case(VERSION_COLUMN)) {
        return Err(invalid(format!("reserved column '{VERSION_COLUMN}'")));
    }
    Ok(())
}

/// Quote a table or view name, accepting only plain identifiers.
fn table_ident(name: &str) -> Result<String, WarehouseError> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(format!("\"{name}\""))
    } else {
        Err(WarehouseError::InvalidIdentifier(name.to_string()))
    }
}

/// Quote a column name taken from an object header.
fn column_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl Warehouse for SqliteWarehouse {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn replace_table(
        &self,
        table: &str,
        objects: &[StagedObject],
        version: &DataVersion,
    ) -> Result<u64, WarehouseError> {
        let table_name = table_ident(table)?;
        let data = self.read_objects(objects).await?;
        let version = version.to_string();

        let rows = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;

                let column_defs: Vec<String> = data
                    .columns
                    .iter()
                    .map(|c| format!("{} TEXT", column_ident(c)))
                    .chain(std::iter::once(format!("{VERSION_COLUMN} TEXT")))
                    .collect();
                tx.execute(&format!("DROP TABLE IF EXISTS {table_name}"), [])?;
                tx.execute(
                    &format!("CREATE TABLE {table_name} ({})", column_defs.join(", ")),
                    [],
                )?;

                let placeholders = vec!["?"; data.columns.len() + 1].join(", ");
                {
                    let mut stmt =
                        tx.prepare(&format!("INSERT INTO {table_name} VALUES ({placeholders})"))?;
                    for row in &data.rows {
                        let values = row
                            .iter()
                            .map(Option::as_deref)
                            .chain(std::iter::once(Some(version.as_str())));
                        stmt.execute(params_from_iter(values))?;
                    }
                }

                tx.commit()?;
                Ok(data.rows.len() as u64)
            })
            .await?;

        debug!(table, rows, "Replaced table");
        Ok(rows)
    }

    async fn distinct_versions(&self, table: &str) -> Result<Vec<DataVersion>, WarehouseError> {
        let table_name = table_ident(table)?;
        let raw: Vec<String> = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT DISTINCT {VERSION_COLUMN} FROM {table_name} \
                     WHERE {VERSION_COLUMN} IS NOT NULL ORDER BY {VERSION_COLUMN} DESC"
                ))?;
                let values = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(values)
            })
            .await?;

        let mut versions = Vec::with_capacity(raw.len());
        for value in raw {
            match DataVersion::parse(&value) {
                Ok(version) => versions.push(version),
                Err(e) => warn!(table, "Ignoring unparsable version: {}", e),
            }
        }
        versions.sort_unstable_by(|a, b| b.cmp(a));
        Ok(versions)
    }

    async fn row_count(&self, table: &str) -> Result<u64, WarehouseError> {
        let table_name = table_ident(table)?;
        self.with_conn(move |conn| {
            let count: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table_name}"), [], |row| {
                    row.get(0)
                })?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    async fn create_or_replace_view(&self, view: &str, sql: &str) -> Result<(), WarehouseError> {
        let view_name = table_ident(view)?;
        let sql = sql.to_string();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(&format!("DROP VIEW IF EXISTS {view_name}"), [])?;
            tx.execute(&format!("CREATE VIEW {view_name} AS {sql}"), [])?;
            // SQLite resolves view references lazily; preparing a read surfaces
            // missing tables and columns before the replacement is committed.
            tx.prepare(&format!("SELECT * FROM {view_name} LIMIT 0"))?;
            tx.commit()?;
            Ok(())
        })
        .await?;

        debug!(view, "Created view");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchToken;
    use crate::storage::FsObjectStore;
    use crate::testing::fixtures;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Arc<FsObjectStore>, SqliteWarehouse) {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FsObjectStore::new(temp.path(), "staging"));
        let warehouse =
            SqliteWarehouse::in_memory(Arc::clone(&store) as Arc<dyn ObjectStore>).unwrap();
        (temp, store, warehouse)
    }

    async fn stage(store: &FsObjectStore, key: &str, content: &str) -> StagedObject {
        store
            .put_object(key, content.as_bytes().to_vec())
            .await
            .unwrap();
        StagedObject::parse(key).unwrap()
    }

    fn version(token: &str) -> DataVersion {
        BatchToken::parse(token).unwrap().data_version()
    }

    #[tokio::test]
    async fn test_replace_table_loads_rows_with_version() {
        let (_temp, store, warehouse) = setup().await;
        let obj = stage(
            &store,
            "raw/ratios__20240115_14-30-05.csv",
            "siren,ratio\n001,1.5\n002,2.5\n",
        )
        .await;

        let rows = warehouse
            .replace_table("ratios_raw", &[obj], &version("20240115_14-30-05"))
            .await
            .unwrap();
        assert_eq!(rows, 2);
        assert_eq!(warehouse.row_count("ratios_raw").await.unwrap(), 2);

        let versions = warehouse.distinct_versions("ratios_raw").await.unwrap();
        assert_eq!(versions, vec![version("20240115_14-30-05")]);
    }

    #[tokio::test]
    async fn test_replace_table_is_full_refresh() {
        let (_temp, store, warehouse) = setup().await;
        let first = stage(&store, "raw/ratios__20240101_00-00-00.csv", "a\n1\n2\n3\n").await;
        let second = stage(&store, "raw/ratios__20240201_00-00-00.csv", "a\n9\n").await;

        warehouse
            .replace_table("ratios_raw", &[first], &version("20240101_00-00-00"))
            .await
            .unwrap();
        warehouse
            .replace_table("ratios_raw", &[second], &version("20240201_00-00-00"))
            .await
            .unwrap();

        assert_eq!(warehouse.row_count("ratios_raw").await.unwrap(), 1);
        assert_eq!(
            warehouse.distinct_versions("ratios_raw").await.unwrap(),
            vec![version("20240201_00-00-00")]
        );
    }

    #[tokio::test]
    async fn test_replace_table_loads_parquet() {
        let (_temp, store, warehouse) = setup().await;
        let key = "raw/stock__20240101_00-00-00.parquet";
        store
            .put_object(key, fixtures::parquet_body(&[("AAA", 10), ("BBB", 20)]))
            .await
            .unwrap();
        let obj = StagedObject::parse(key).unwrap();

        let rows = warehouse
            .replace_table("stock_raw", &[obj], &version("20240101_00-00-00"))
            .await
            .unwrap();
        assert_eq!(rows, 2);

        warehouse
            .create_or_replace_view("v_big", "SELECT * FROM stock_raw WHERE value = '20'")
            .await
            .unwrap();
        assert_eq!(warehouse.row_count("v_big").await.unwrap(), 1);
        assert_eq!(
            warehouse.distinct_versions("stock_raw").await.unwrap(),
            vec![version("20240101_00-00-00")]
        );
    }

    #[tokio::test]
    async fn test_replace_table_merges_csv_and_parquet_objects() {
        let (_temp, store, warehouse) = setup().await;
        let csv = stage(&store, "raw/stock__20240101_00-00-00.csv", "symbol,value
CCC,30
").await;
        let key = "raw/stock__20240101_00-00-00.parquet";
        store
            .put_object(key, fixtures::parquet_body(&[("AAA", 10)]))
            .await
            .unwrap();
        let parquet = StagedObject::parse(key).unwrap();

        let rows = warehouse
            .replace_table("stock_raw", &[csv, parquet], &version("20240101_00-00-00"))
            .await
            .unwrap();
        assert_eq!(rows, 2);
    }

    #[tokio::test]
    async fn test_replace_table_rejects_corrupt_parquet() {
        let (_temp, store, warehouse) = setup().await;
        let obj = stage(&store, "raw/stock__20240101_00-00-00.parquet", "PAR1").await;

        let err = warehouse
            .replace_table("stock_raw", &[obj], &version("20240101_00-00-00"))
            .await
            .unwrap_err();
        assert!(matches!(err, WarehouseError::InvalidData { .. }));
    }

    #[tokio::test]
    async fn test_replace_table_rejects_unknown_extension() {
        let (_temp, store, warehouse) = setup().await;
        let obj = stage(&store, "raw/stock__20240101_00-00-00.json", "{}").await;

        let err = warehouse
            .replace_table("stock_raw", &[obj], &version("20240101_00-00-00"))
            .await
            .unwrap_err();
        assert!(matches!(err, WarehouseError::UnsupportedFormat { .. }));
    }

    #[tokio::test]
    async fn test_replace_table_keeps_previous_contents_on_bad_csv() {
        let (_temp, store, warehouse) = setup().await;
        let good = stage(&store, "raw/ratios__20240101_00-00-00.csv", "a,b\n1,2\n").await;
        let bad = stage(&store, "raw/ratios__20240201_00-00-00.csv", "a,b\n1,2,3\n").await;

        warehouse
            .replace_table("ratios_raw", &[good], &version("20240101_00-00-00"))
            .await
            .unwrap();
        assert!(warehouse
            .replace_table("ratios_raw", &[bad], &version("20240201_00-00-00"))
            .await
            .is_err());
        assert_eq!(warehouse.row_count("ratios_raw").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_table_name() {
        let (_temp, _store, warehouse) = setup().await;
        let err = warehouse.row_count("ratios; DROP TABLE x").await.unwrap_err();
        assert!(matches!(err, WarehouseError::InvalidIdentifier(_)));
    }

    #[tokio::test]
    async fn test_create_or_replace_view() {
        let (_temp, store, warehouse) = setup().await;
        let obj = stage(&store, "raw/ratios__20240101_00-00-00.csv", "a\n1\n2\n").await;
        warehouse
            .replace_table("ratios_raw", &[obj], &version("20240101_00-00-00"))
            .await
            .unwrap();

        warehouse
            .create_or_replace_view("v_all", "SELECT * FROM ratios_raw")
            .await
            .unwrap();
        assert_eq!(warehouse.row_count("v_all").await.unwrap(), 2);

        warehouse
            .create_or_replace_view("v_all", "SELECT * FROM ratios_raw WHERE a = '1'")
            .await
            .unwrap();
        assert_eq!(warehouse.row_count("v_all").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_view_over_missing_table_fails_and_keeps_old_view() {
        let (_temp, store, warehouse) = setup().await;
        let obj = stage(&store, "raw/ratios__20240101_00-00-00.csv", "a\n1\n").await;
        warehouse
            .replace_table("ratios_raw", &[obj], &version("20240101_00-00-00"))
            .await
            .unwrap();
        warehouse
            .create_or_replace_view("v_all", "SELECT * FROM ratios_raw")
            .await
            .unwrap();

        assert!(warehouse
            .create_or_replace_view("v_all", "SELECT * FROM missing_table")
            .await
            .is_err());
        assert_eq!(warehouse.row_count("v_all").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_distinct_versions_of_missing_table_is_error() {
        let (_temp, _store, warehouse) = setup().await;
        assert!(warehouse.distinct_versions("ratios_raw").await.is_err());
    }
}
