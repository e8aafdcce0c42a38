//! Read-only views over staged batches, data versions and warehouse tables.

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use siloflow_core::config::SanitizedSourceConfig;
use siloflow_core::{Batch, DataVersion, StagedObjectCounts, TableStats};

use crate::state::AppState;

/// Pickers show at most this many entries.
pub const PICKER_LIMIT: usize = 20;
const OVERVIEW_VERSIONS: usize = 10;

#[derive(Debug, Serialize)]
pub struct VersionEntry {
    pub version: DataVersion,
    pub latest: bool,
}

#[derive(Debug, Serialize)]
pub struct OverviewResponse {
    pub staged: StagedObjectCounts,
    pub tables: Vec<TableStats>,
    /// Most recent data versions, newest first.
    pub recent_versions: Vec<VersionEntry>,
    /// Version the dashboard view is built from.
    pub dashboard_version: Option<DataVersion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dashboard_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchListResponse {
    pub total: usize,
    pub batches: Vec<Batch>,
}

#[derive(Debug, Serialize)]
pub struct VersionListResponse {
    pub total: usize,
    pub versions: Vec<DataVersion>,
}

pub async fn overview(State(state): State<Arc<AppState>>) -> Json<OverviewResponse> {
    let registry = state.orchestrator().registry();
    let staged = registry.count_staged_objects().await;
    let tables = registry.table_row_counts().await;
    let versions = registry.list_available_versions().await;

    let recent_versions = versions
        .iter()
        .take(OVERVIEW_VERSIONS)
        .enumerate()
        .map(|(i, v)| VersionEntry {
            version: *v,
            latest: i == 0,
        })
        .collect();

    Json(OverviewResponse {
        staged,
        tables,
        recent_versions,
        dashboard_version: versions.first().copied(),
        dashboard_url: state.config().dashboard_url.clone(),
    })
}

/// Active sources, with URL query strings redacted.
pub async fn list_sources(State(state): State<Arc<AppState>>) -> Json<Vec<SanitizedSourceConfig>> {
    Json(
        state
            .sanitized_config()
            .sources
            .into_iter()
            .filter(|s| s.active)
            .collect(),
    )
}

pub async fn list_batches(State(state): State<Arc<AppState>>) -> Json<BatchListResponse> {
    let mut batches = state.orchestrator().registry().list_available_batches().await;
    let total = batches.len();
    batches.truncate(PICKER_LIMIT);
    Json(BatchListResponse { total, batches })
}

pub async fn list_versions(State(state): State<Arc<AppState>>) -> Json<VersionListResponse> {
    let mut versions = state.orchestrator().registry().list_available_versions().await;
    let total = versions.len();
    versions.truncate(PICKER_LIMIT);
    Json(VersionListResponse { total, versions })
}
