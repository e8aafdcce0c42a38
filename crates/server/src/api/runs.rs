//! Run endpoints: launch, stop and inspect extraction, load, transform and
//! full pipeline runs.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use siloflow_core::{BatchToken, DataVersion, PipelineRequest, StageKind};

use super::handlers::ErrorResponse;
use crate::runs::{LaunchError, RunRequest, RunState};
use crate::state::AppState;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

/// Optional parameters of a launch; which fields apply depends on the kind.
#[derive(Debug, Default, Deserialize)]
pub struct LaunchBody {
    /// Extraction and pipeline: only extract this source.
    #[serde(default)]
    pub source: Option<String>,
    /// Load: batch token (`YYYYMMDD_HH-MM-SS`). Transform: data version
    /// (`YYYY-MM-DD HH:MM:SS`). The most recent one when absent.
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub skip_extraction: bool,
    #[serde(default)]
    pub skip_load: bool,
}

impl LaunchBody {
    fn into_request(self, kind: StageKind) -> Result<RunRequest, String> {
        Ok(match kind {
            StageKind::Extraction => RunRequest::Extraction {
                source: self.source,
            },
            StageKind::Load => RunRequest::Load {
                batch: self
                    .timestamp
                    .as_deref()
                    .map(BatchToken::parse)
                    .transpose()
                    .map_err(|e| e.to_string())?,
            },
            StageKind::Transform => RunRequest::Transform {
                version: self
                    .timestamp
                    .as_deref()
                    .map(DataVersion::parse)
                    .transpose()
                    .map_err(|e| e.to_string())?,
            },
            StageKind::Pipeline => RunRequest::Pipeline(PipelineRequest {
                source_filter: self.source,
                skip_extraction: self.skip_extraction,
                skip_load: self.skip_load,
            }),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct LaunchResponse {
    pub run_id: Uuid,
    pub kind: StageKind,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub kind: StageKind,
    /// False when nothing of this kind was running.
    pub stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
}

fn parse_kind(kind: &str) -> Result<StageKind, ApiError> {
    StageKind::parse(kind)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Unknown run kind: {kind}")))
}

pub async fn launch_run(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    body: Option<Json<LaunchBody>>,
) -> Result<(StatusCode, Json<LaunchResponse>), ApiError> {
    let kind = parse_kind(&kind)?;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let request = body
        .into_request(kind)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;

    match state.runs().launch(request).await {
        Ok(run_id) => Ok((StatusCode::ACCEPTED, Json(LaunchResponse { run_id, kind }))),
        Err(e @ LaunchError::AlreadyRunning { .. }) => {
            Err(api_error(StatusCode::CONFLICT, e.to_string()))
        }
    }
}

pub async fn stop_run(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Result<Json<StopResponse>, ApiError> {
    let kind = parse_kind(&kind)?;
    let run_id = state.runs().stop(kind).await;
    Ok(Json(StopResponse {
        kind,
        stopped: run_id.is_some(),
        run_id,
    }))
}

pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Result<Json<RunState>, ApiError> {
    let kind = parse_kind(&kind)?;
    Ok(Json(state.runs().state(kind).await))
}

pub async fn list_runs(State(state): State<Arc<AppState>>) -> Json<Vec<RunState>> {
    let mut runs = Vec::with_capacity(StageKind::ALL.len());
    for kind in StageKind::ALL {
        runs.push(state.runs().state(kind).await);
    }
    Json(runs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_body_parses_batch_token() {
        let body = LaunchBody {
            timestamp: Some("20240115_14-30-05".to_string()),
            ..Default::default()
        };
        match body.into_request(StageKind::Load).unwrap() {
            RunRequest::Load { batch } => {
                assert_eq!(batch.unwrap().to_string(), "20240115_14-30-05")
            }
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn test_transform_body_rejects_batch_token_format() {
        let body = LaunchBody {
            timestamp: Some("20240115_14-30-05".to_string()),
            ..Default::default()
        };
        assert!(body.into_request(StageKind::Transform).is_err());
    }

    #[test]
    fn test_pipeline_body_maps_flags() {
        let body = LaunchBody {
            source: Some("ratios".to_string()),
            skip_load: true,
            ..Default::default()
        };
        assert_eq!(
            body.into_request(StageKind::Pipeline).unwrap(),
            RunRequest::Pipeline(PipelineRequest {
                source_filter: Some("ratios".to_string()),
                skip_extraction: false,
                skip_load: true,
            })
        );
    }
}
