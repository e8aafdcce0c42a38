//! Testing utilities and mock implementations of the collaborator traits.
//!
//! # Example
//!
//! ```rust,ignore
//! use siloflow_core::testing::{fixtures, MockFetcher, MockObjectStore, MockWarehouse};
//!
//! let fetcher = MockFetcher::new();
//! fetcher.fail_source("stock").await;
//!
//! let config = fixtures::config();
//! ```

mod mock_fetcher;
mod mock_store;
mod mock_warehouse;

pub use mock_fetcher::MockFetcher;
pub use mock_store::MockObjectStore;
pub use mock_warehouse::{MockWarehouse, RecordedLoad, RecordedView};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::config::{
        Config, FetcherConfig, PipelineConfig, ServerConfig, SourceConfig, SourceFormat,
        StorageConfig, ViewConfig, WarehouseConfig,
    };

    pub fn source(name: &str, dataset_id: &str, table: &str, active: bool) -> SourceConfig {
        SourceConfig {
            name: name.to_string(),
            description: format!("{name} dataset"),
            url: format!("https://data.example.com/{dataset_id}.csv?token=secret"),
            active,
            dataset_id: dataset_id.to_string(),
            table: table.to_string(),
            format: SourceFormat::Csv,
        }
    }

    pub fn view(name: &str, query: &str, depends_on: &[&str]) -> ViewConfig {
        ViewConfig {
            name: name.to_string(),
            query: query.to_string(),
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            description: None,
        }
    }

    /// Config with the given sources and views and defaults elsewhere.
    pub fn config_with(sources: Vec<SourceConfig>, views: Vec<ViewConfig>) -> Config {
        let version_table = sources
            .first()
            .map(|s| s.table.clone())
            .unwrap_or_else(|| "raw".to_string());
        Config {
            server: ServerConfig::default(),
            storage: StorageConfig {
                bucket: "etl-staging".to_string(),
                raw_prefix: "raw/".to_string(),
                root: "data/storage".into(),
            },
            warehouse: WarehouseConfig {
                project_id: "acme".to_string(),
                dataset: "finance".to_string(),
                version_table,
                path: "data/warehouse.db".into(),
            },
            sources,
            views,
            dashboard_url: Some("https://dashboards.example.com/finance".to_string()),
            pipeline: PipelineConfig::default(),
            fetcher: FetcherConfig::default(),
        }
    }

    /// Two raw tables, two cleaned views and a dashboard view reading both.
    pub fn config() -> Config {
        config_with(
            vec![
                source("ratios", "ratios", "ratios_raw", true),
                source("stock", "stock", "stock_raw", true),
            ],
            vec![
                view(
                    "ratios_clean",
                    "SELECT * FROM ratios_raw WHERE extraction_timestamp = '{timestamp}'",
                    &[],
                ),
                view(
                    "stock_clean",
                    "SELECT * FROM stock_raw WHERE extraction_timestamp = '{timestamp}'",
                    &[],
                ),
                view(
                    "dashboard_view",
                    "SELECT r.symbol, r.value AS ratio, s.value AS stock \
                     FROM ratios_clean r JOIN stock_clean s ON r.symbol = s.symbol",
                    &["ratios_clean", "stock_clean"],
                ),
            ],
        )
    }

    /// Sources A and B active, C inactive; the last view reads the other two.
    pub fn abc_config() -> Config {
        config_with(
            vec![
                source("A", "alpha", "alpha_raw", true),
                source("B", "beta", "beta_raw", true),
                source("C", "gamma", "gamma_raw", false),
            ],
            vec![
                view(
                    "alpha_view",
                    "SELECT * FROM alpha_raw WHERE extraction_timestamp = '{timestamp}'",
                    &[],
                ),
                view(
                    "beta_view",
                    "SELECT * FROM beta_raw WHERE extraction_timestamp = '{timestamp}'",
                    &[],
                ),
                view(
                    "combined_view",
                    "SELECT a.symbol, a.value AS alpha, b.value AS beta \
                     FROM alpha_view a JOIN beta_view b ON a.symbol = b.symbol",
                    &["alpha_view", "beta_view"],
                ),
            ],
        )
    }

    /// CSV body with a `symbol,value` header and the given rows.
    pub fn csv_body(rows: &[(&str, i64)]) -> Vec<u8> {
        let mut body = String::from("symbol,value\n");
        for (symbol, value) in rows {
            body.push_str(&format!("{symbol},{value}\n"));
        }
        body.into_bytes()
    }

    /// Parquet body with `symbol` (string) and `value` (int64) columns.
    pub fn parquet_body(rows: &[(&str, i64)]) -> Vec<u8> {
        use polars::prelude::{Column, DataFrame, ParquetWriter};

        let symbols: Vec<&str> = rows.iter().map(|(s, _)| *s).collect();
        let values: Vec<i64> = rows.iter().map(|(_, v)| *v).collect();
        let mut df = DataFrame::new(vec![
            Column::new("symbol".into(), symbols),
            Column::new("value".into(), values),
        ])
        .expect("fixture frame");

        let mut body = Vec::new();
        ParquetWriter::new(&mut body)
            .finish(&mut df)
            .expect("fixture parquet");
        body
    }
}
