//! Launching, stopping and tracking runs.
//!
//! At most one run per [`StageKind`] is active at a time. Every launch gets a
//! fresh cancellation token and a fresh log buffer; stopping cancels the
//! token of the active run of that kind only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use siloflow_core::{
    progress_channel, BatchToken, DataVersion, ItemOutcome, LogBuffer, LogRelay,
    PipelineConfig, PipelineOrchestrator, PipelineReport, PipelineRequest, ProgressEvent,
    ProgressHandle, StageKind, StageOutcome, StageResult,
};

use crate::api::WsBroadcaster;

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A run to launch, with its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunRequest {
    Extraction { source: Option<String> },
    Load { batch: Option<BatchToken> },
    Transform { version: Option<DataVersion> },
    Pipeline(PipelineRequest),
}

impl RunRequest {
    pub fn kind(&self) -> StageKind {
        match self {
            Self::Extraction { .. } => StageKind::Extraction,
            Self::Load { .. } => StageKind::Load,
            Self::Transform { .. } => StageKind::Transform,
            Self::Pipeline(_) => StageKind::Pipeline,
        }
    }
}

/// What a finished run produced.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RunResult {
    Extraction(StageResult),
    Load { loaded: bool },
    Transform(StageResult),
    Pipeline(PipelineReport),
}

impl RunResult {
    /// Per-item rows: sources for extraction, views for transform, both for a pipeline.
    pub fn items(&self) -> Vec<ItemOutcome> {
        match self {
            Self::Extraction(result) | Self::Transform(result) => result.items.clone(),
            Self::Load { .. } => Vec::new(),
            Self::Pipeline(report) => report
                .extraction
                .iter()
                .chain(report.transform.iter())
                .flat_map(|r| r.items.iter().cloned())
                .collect(),
        }
    }

    fn status(&self) -> RunStatus {
        let label = match self {
            Self::Extraction(result) | Self::Transform(result) => result.status_label(),
            Self::Load { loaded: true } => "succeeded",
            Self::Load { loaded: false } => "failed",
            Self::Pipeline(report) => report.status_label(),
        };
        match label {
            "succeeded" => RunStatus::Succeeded,
            "partial" => RunStatus::Partial,
            _ => RunStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Partial,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Final record of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub kind: StageKind,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub items: Vec<ItemOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RunResult>,
    /// Set when the run ended abnormally.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dashboard_url: Option<String>,
    pub logs: Vec<String>,
}

/// The run currently in progress for one kind.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveRunView {
    pub id: Uuid,
    pub kind: StageKind,
    pub started_at: DateTime<Utc>,
    pub stop_requested: bool,
    pub logs: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    pub kind: StageKind,
    pub active: Option<ActiveRunView>,
    pub last: Option<RunSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LaunchError {
    #[error("A {kind} run is already in progress ({id})")]
    AlreadyRunning { kind: StageKind, id: Uuid },
}

struct ActiveRun {
    id: Uuid,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    log: Arc<RwLock<LogBuffer>>,
}

#[derive(Default)]
struct RunSlot {
    active: Option<ActiveRun>,
    last: Option<RunSummary>,
}

/// Owns the per-kind run slots.
pub struct RunManager {
    orchestrator: Arc<PipelineOrchestrator>,
    broadcaster: WsBroadcaster,
    settings: PipelineConfig,
    dashboard_url: Option<String>,
    slots: Arc<Mutex<HashMap<StageKind, RunSlot>>>,
}

impl RunManager {
    pub fn new(
        orchestrator: Arc<PipelineOrchestrator>,
        broadcaster: WsBroadcaster,
        settings: PipelineConfig,
        dashboard_url: Option<String>,
    ) -> Self {
        Self {
            orchestrator,
            broadcaster,
            settings,
            dashboard_url,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a run in the background. Fails if one of the same kind is active.
    pub async fn launch(&self, request: RunRequest) -> Result<Uuid, LaunchError> {
        let kind = request.kind();
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let log = Arc::new(RwLock::new(LogBuffer::new(self.settings.log_buffer_lines)));
        let started_at = Utc::now();

        {
            let mut slots = self.slots.lock().await;
            let slot = slots.entry(kind).or_default();
            if let Some(active) = &slot.active {
                return Err(LaunchError::AlreadyRunning {
                    kind,
                    id: active.id,
                });
            }
            slot.active = Some(ActiveRun {
                id,
                started_at,
                cancel: cancel.clone(),
                log: Arc::clone(&log),
            });
        }

        let (progress, rx) = progress_channel(self.settings.progress_channel_capacity);
        let broadcaster = self.broadcaster.clone();
        let relay = LogRelay::new(
            rx,
            Arc::clone(&log),
            Duration::from_millis(self.settings.relay_tick_ms),
        )
        .with_callback(Arc::new(move |events: &[ProgressEvent]| {
            for event in events {
                broadcaster.run_event(id, kind, event.clone());
            }
        }));

        let job = run_job(Arc::clone(&self.orchestrator), request, cancel);
        let finisher = Finisher {
            id,
            kind,
            started_at,
            log,
            slots: Arc::clone(&self.slots),
            broadcaster: self.broadcaster.clone(),
            dashboard_url: self.dashboard_url.clone(),
        };

        info!(%id, %kind, "Launching run");
        self.broadcaster.run_started(id, kind);
        tokio::spawn(supervise(job, progress, relay, finisher));
        Ok(id)
    }

    /// Request the active run of `kind` to stop at its next checkpoint.
    ///
    /// Returns the id of the run that was asked to stop, if any.
    pub async fn stop(&self, kind: StageKind) -> Option<Uuid> {
        let slots = self.slots.lock().await;
        let active = slots.get(&kind)?.active.as_ref()?;
        info!(id = %active.id, %kind, "Stop requested");
        active.cancel.cancel();
        Some(active.id)
    }

    /// Request every active run to stop. Returns the ids asked to stop.
    pub async fn stop_all(&self) -> Vec<Uuid> {
        let slots = self.slots.lock().await;
        slots
            .values()
            .filter_map(|slot| slot.active.as_ref())
            .map(|active| {
                active.cancel.cancel();
                active.id
            })
            .collect()
    }

    pub async fn state(&self, kind: StageKind) -> RunState {
        let (active, last) = {
            let slots = self.slots.lock().await;
            match slots.get(&kind) {
                Some(slot) => (
                    slot.active
                        .as_ref()
                        .map(|a| (a.id, a.started_at, a.cancel.is_cancelled(), Arc::clone(&a.log))),
                    slot.last.clone(),
                ),
                None => (None, None),
            }
        };

        let active = match active {
            Some((id, started_at, stop_requested, log)) => Some(ActiveRunView {
                id,
                kind,
                started_at,
                stop_requested,
                logs: log.read().await.render(),
            }),
            None => None,
        };
        RunState { kind, active, last }
    }

    /// Kinds with a run in progress.
    pub async fn active_kinds(&self) -> Vec<StageKind> {
        let slots = self.slots.lock().await;
        StageKind::ALL
            .into_iter()
            .filter(|k| slots.get(k).is_some_and(|s| s.active.is_some()))
            .collect()
    }

    /// Wait up to `timeout` for every active run to finish.
    ///
    /// Returns the kinds still running when the wait gave up.
    pub async fn wait_idle(&self, timeout: Duration) -> Vec<StageKind> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let active = self.active_kinds().await;
            if active.is_empty() || tokio::time::Instant::now() >= deadline {
                return active;
            }
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
    }
}

type RunFuture = BoxFuture<'static, StageOutcome<RunResult>>;

fn run_job(
    orchestrator: Arc<PipelineOrchestrator>,
    request: RunRequest,
    cancel: CancellationToken,
) -> impl FnOnce(ProgressHandle) -> RunFuture {
    move |progress| {
        Box::pin(async move {
            match request {
                RunRequest::Extraction { source } => orchestrator
                    .extraction()
                    .run(source.as_deref(), &cancel, &progress)
                    .await
                    .map(RunResult::Extraction),
                RunRequest::Load { batch } => orchestrator
                    .load()
                    .run(batch, &cancel, &progress)
                    .await
                    .map(|loaded| RunResult::Load { loaded }),
                RunRequest::Transform { version } => orchestrator
                    .transform()
                    .run(version, &cancel, &progress)
                    .await
                    .map(RunResult::Transform),
                RunRequest::Pipeline(request) => orchestrator
                    .run(&request, &cancel, &progress)
                    .await
                    .map(RunResult::Pipeline),
            }
        })
    }
}

struct Finisher {
    id: Uuid,
    kind: StageKind,
    started_at: DateTime<Utc>,
    log: Arc<RwLock<LogBuffer>>,
    slots: Arc<Mutex<HashMap<StageKind, RunSlot>>>,
    broadcaster: WsBroadcaster,
    dashboard_url: Option<String>,
}

async fn supervise<F>(job: F, progress: ProgressHandle, relay: LogRelay, finisher: Finisher)
where
    F: FnOnce(ProgressHandle) -> RunFuture,
{
    let clock = Instant::now();
    let relay = tokio::spawn(relay.run());

    // The job owns the only progress handle, so the relay stops once it ends.
    let joined = tokio::spawn(job(progress)).await;
    if let Err(e) = relay.await {
        warn!(id = %finisher.id, "Log relay ended abnormally: {}", e);
    }

    let (status, result, error) = match joined {
        Ok(StageOutcome::Completed(result)) => (result.status(), Some(result), None),
        Ok(StageOutcome::Cancelled) => (RunStatus::Cancelled, None, None),
        Err(e) => {
            error!(id = %finisher.id, kind = %finisher.kind, "Run crashed: {}", e);
            (RunStatus::Failed, None, Some("run ended unexpectedly".to_string()))
        }
    };
    finisher.finish(status, result, error, clock.elapsed()).await;
}

impl Finisher {
    async fn finish(
        self,
        status: RunStatus,
        result: Option<RunResult>,
        error: Option<String>,
        elapsed: Duration,
    ) {
        let shows_dashboard = status == RunStatus::Succeeded
            && matches!(self.kind, StageKind::Transform | StageKind::Pipeline);
        let summary = RunSummary {
            id: self.id,
            kind: self.kind,
            status,
            started_at: self.started_at,
            finished_at: Utc::now(),
            duration_secs: elapsed.as_secs_f64(),
            items: result.as_ref().map(RunResult::items).unwrap_or_default(),
            result,
            error,
            dashboard_url: self.dashboard_url.filter(|_| shows_dashboard),
            logs: self.log.read().await.render(),
        };

        info!(
            id = %self.id,
            kind = %self.kind,
            status = status.as_str(),
            duration_secs = summary.duration_secs,
            "Run finished"
        );

        {
            let mut slots = self.slots.lock().await;
            let slot = slots.entry(self.kind).or_default();
            if slot.active.as_ref().is_some_and(|a| a.id == self.id) {
                slot.active = None;
            }
            slot.last = Some(summary);
        }
        self.broadcaster.run_finished(self.id, self.kind, status);
    }
}
