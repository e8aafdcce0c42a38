use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub warehouse: WarehouseConfig,
    /// External data sources, in extraction order.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    /// Derived views, in build order.
    #[serde(default)]
    pub views: Vec<ViewConfig>,
    /// Link to the external reporting dashboard.
    #[serde(default)]
    pub dashboard_url: Option<String>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
}

impl Config {
    /// Sources that participate in extraction.
    pub fn active_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.active)
    }

    /// Raw tables targeted by the configured sources, deduplicated, in source order.
    pub fn raw_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = Vec::new();
        for source in &self.sources {
            if !tables.contains(&source.table) {
                tables.push(source.table.clone());
            }
        }
        tables
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory holding the dashboard's static files, if any.
    #[serde(default)]
    pub dashboard_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dashboard_dir: None,
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Object storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Bucket holding staged objects.
    pub bucket: String,
    /// Prefix under which raw extraction output is written.
    #[serde(default = "default_raw_prefix")]
    pub raw_prefix: String,
    /// Local directory backing the bucket.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

fn default_raw_prefix() -> String {
    "raw/".to_string()
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/storage")
}

/// Data warehouse configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WarehouseConfig {
    pub project_id: String,
    pub dataset: String,
    /// Raw table whose distinct `extraction_timestamp` values define the data versions.
    pub version_table: String,
    /// Local database file backing the warehouse.
    #[serde(default = "default_warehouse_path")]
    pub path: PathBuf,
}

fn default_warehouse_path() -> PathBuf {
    PathBuf::from("data/warehouse.db")
}

/// File format of a source's staged objects.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    #[default]
    Csv,
    Parquet,
}

impl SourceFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Parquet => "parquet",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "csv" => Some(Self::Csv),
            "parquet" => Some(Self::Parquet),
            _ => None,
        }
    }
}

/// An external dataset to download.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Prefix of the staged object names (`<dataset_id>__<token>.<ext>`).
    pub dataset_id: String,
    /// Raw warehouse table this source loads into.
    pub table: String,
    #[serde(default)]
    pub format: SourceFormat,
}

fn default_active() -> bool {
    true
}

/// A derived view built by the transform stage.
///
/// The query is a template; `{project}`, `{dataset}` and `{timestamp}` are
/// substituted before the view is created.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ViewConfig {
    pub name: String,
    pub query: String,
    /// Views (earlier in the list) this view reads from.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Behavior of pipeline runs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Keep going to the next stage after extraction or load reported failure.
    #[serde(default = "default_continue_on_stage_failure")]
    pub continue_on_stage_failure: bool,
    /// Mark views whose dependencies failed as skipped instead of attempting them.
    #[serde(default)]
    pub skip_failed_dependents: bool,
    /// Number of log lines kept per run.
    #[serde(default = "default_log_buffer_lines")]
    pub log_buffer_lines: usize,
    /// Capacity of the progress event queue.
    #[serde(default = "default_progress_capacity")]
    pub progress_channel_capacity: usize,
    /// How often the relay drains the progress queue (milliseconds).
    #[serde(default = "default_relay_tick_ms")]
    pub relay_tick_ms: u64,
}

fn default_continue_on_stage_failure() -> bool {
    true
}

fn default_log_buffer_lines() -> usize {
    100
}

fn default_progress_capacity() -> usize {
    1000
}

fn default_relay_tick_ms() -> u64 {
    100
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            continue_on_stage_failure: default_continue_on_stage_failure(),
            skip_failed_dependents: false,
            log_buffer_lines: default_log_buffer_lines(),
            progress_channel_capacity: default_progress_capacity(),
            relay_tick_ms: default_relay_tick_ms(),
        }
    }
}

/// HTTP source fetcher configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetcherConfig {
    /// Request timeout in seconds (default: 300)
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u32,
}

fn default_fetch_timeout() -> u32 {
    300
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
        }
    }
}

/// Sanitized config for API responses (source URL query strings redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub storage: SanitizedStorageConfig,
    pub warehouse: SanitizedWarehouseConfig,
    pub sources: Vec<SanitizedSourceConfig>,
    pub views: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dashboard_url: Option<String>,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedStorageConfig {
    pub bucket: String,
    pub raw_prefix: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedWarehouseConfig {
    pub project_id: String,
    pub dataset: String,
    pub version_table: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedSourceConfig {
    pub name: String,
    pub description: String,
    pub url: String,
    pub active: bool,
    pub table: String,
}

/// Strip the query string, which is where download tokens usually live.
fn redact_query(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{}?…", base),
        None => url.to_string(),
    }
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            storage: SanitizedStorageConfig {
                bucket: config.storage.bucket.clone(),
                raw_prefix: config.storage.raw_prefix.clone(),
            },
            warehouse: SanitizedWarehouseConfig {
                project_id: config.warehouse.project_id.clone(),
                dataset: config.warehouse.dataset.clone(),
                version_table: config.warehouse.version_table.clone(),
            },
            sources: config
                .sources
                .iter()
                .map(|s| SanitizedSourceConfig {
                    name: s.name.clone(),
                    description: s.description.clone(),
                    url: redact_query(&s.url),
                    active: s.active,
                    table: s.table.clone(),
                })
                .collect(),
            views: config.views.iter().map(|v| v.name.clone()).collect(),
            dashboard_url: config.dashboard_url.clone(),
            pipeline: config.pipeline.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[storage]
bucket = "etl-staging"

[warehouse]
project_id = "acme"
dataset = "finance"
version_table = "ratios_raw"
"#;

    #[test]
    fn test_deserialize_minimal_config_uses_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.storage.raw_prefix, "raw/");
        assert!(config.sources.is_empty());
        assert!(config.pipeline.continue_on_stage_failure);
        assert!(!config.pipeline.skip_failed_dependents);
        assert_eq!(config.pipeline.log_buffer_lines, 100);
        assert_eq!(config.fetcher.timeout_secs, 300);
    }

    #[test]
    fn test_deserialize_sources_and_views() {
        let toml = format!(
            r#"{MINIMAL}
[[sources]]
name = "ratios"
description = "Financial ratios"
url = "https://example.org/ratios.csv?token=abc"
dataset_id = "ratios_inpi"
table = "ratios_raw"

[[sources]]
name = "stock"
url = "https://example.org/stock.parquet"
active = false
dataset_id = "stock_entreprises"
table = "stock_raw"
format = "parquet"

[[views]]
name = "v_ratios_cleaned"
query = "SELECT * FROM ratios_raw WHERE extraction_timestamp = '{{timestamp}}'"

[[views]]
name = "v_dashboard"
query = "SELECT * FROM v_ratios_cleaned"
depends_on = ["v_ratios_cleaned"]
"#
        );
        let config: Config = toml::from_str(&toml).unwrap();
        assert_eq!(config.sources.len(), 2);
        assert!(config.sources[0].active);
        assert_eq!(config.sources[0].format, SourceFormat::Csv);
        assert!(!config.sources[1].active);
        assert_eq!(config.sources[1].format, SourceFormat::Parquet);
        assert_eq!(config.active_sources().count(), 1);
        assert_eq!(config.raw_tables(), vec!["ratios_raw", "stock_raw"]);
        assert_eq!(config.views[1].depends_on, vec!["v_ratios_cleaned"]);
        assert!(config.views[0].query.contains("{timestamp}"));
    }

    #[test]
    fn test_deserialize_missing_warehouse_fails() {
        let toml = r#"
[storage]
bucket = "etl-staging"
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_sanitized_config_redacts_query_strings() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.sources.push(SourceConfig {
            name: "ratios".to_string(),
            description: String::new(),
            url: "https://example.org/ratios.csv?apikey=secret".to_string(),
            active: true,
            dataset_id: "ratios_inpi".to_string(),
            table: "ratios_raw".to_string(),
            format: SourceFormat::Csv,
        });

        let sanitized = SanitizedConfig::from(&config);
        assert_eq!(sanitized.sources[0].url, "https://example.org/ratios.csv?…");

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_source_format_extension_round_trip() {
        assert_eq!(SourceFormat::from_extension("csv"), Some(SourceFormat::Csv));
        assert_eq!(SourceFormat::Parquet.extension(), "parquet");
        assert_eq!(SourceFormat::from_extension("json"), None);
    }
}
