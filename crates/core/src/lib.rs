pub mod batch;
pub mod config;
pub mod fetcher;
pub mod metrics;
pub mod orchestrator;
pub mod progress;
pub mod registry;
pub mod stage;
pub mod storage;
pub mod testing;
pub mod warehouse;

pub use batch::{Batch, BatchToken, BatchTokenError, DataVersion, StagedObject, StagedObjectCounts};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, PipelineConfig,
    SanitizedConfig, SourceConfig, ViewConfig,
};
pub use fetcher::{FetchError, HttpFetcher, SourceFetcher};
pub use orchestrator::{PipelineOrchestrator, PipelineReport, PipelineRequest};
pub use progress::{
    progress_channel, LogBuffer, LogLevel, LogLine, LogRelay, ProgressEvent, ProgressHandle,
};
pub use registry::{BatchRegistry, RegistryError, TableStats};
pub use stage::{
    ExtractionStage, ItemOutcome, LoadStage, Outcome, StageKind, StageOutcome, StageResult, TransformStage,
};
pub use storage::{FsObjectStore, ObjectStore, StorageError};
pub use warehouse::{SqliteWarehouse, Warehouse, WarehouseError};
