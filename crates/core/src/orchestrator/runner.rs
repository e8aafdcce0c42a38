//! Pipeline orchestrator implementation.
//!
//! Runs Extraction → Load → Transform in that fixed order:
//! - Extraction and Load can be skipped by the request
//! - Transform always runs, over the most recent data version
//! - Upstream failures continue to the next stage unless
//!   `continue_on_stage_failure` is off

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::fetcher::SourceFetcher;
use crate::metrics;
use crate::progress::ProgressHandle;
use crate::registry::BatchRegistry;
use crate::stage::{
    stopped, ExtractionStage, LoadStage, StageKind, StageOutcome, TransformStage,
};
use crate::storage::ObjectStore;
use crate::warehouse::Warehouse;

use super::types::{PipelineReport, PipelineRequest};

const STAGE: StageKind = StageKind::Pipeline;
const BANNER: &str = "════════════════════════════════════════";

/// Sequences the three stages and aggregates their outcomes.
pub struct PipelineOrchestrator {
    config: Arc<Config>,
    registry: Arc<BatchRegistry>,
    extraction: Arc<ExtractionStage>,
    load: Arc<LoadStage>,
    transform: Arc<TransformStage>,
}

impl PipelineOrchestrator {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<BatchRegistry>,
        extraction: Arc<ExtractionStage>,
        load: Arc<LoadStage>,
        transform: Arc<TransformStage>,
    ) -> Self {
        Self {
            config,
            registry,
            extraction,
            load,
            transform,
        }
    }

    /// Wire the registry and the three stages from the collaborators.
    pub fn build(
        config: Arc<Config>,
        fetcher: Arc<dyn SourceFetcher>,
        store: Arc<dyn ObjectStore>,
        warehouse: Arc<dyn Warehouse>,
    ) -> Self {
        let registry = Arc::new(BatchRegistry::new(
            &config,
            Arc::clone(&store),
            Arc::clone(&warehouse),
        ));
        let extraction = Arc::new(ExtractionStage::new(Arc::clone(&config), fetcher, store));
        let load = Arc::new(LoadStage::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            Arc::clone(&warehouse),
        ));
        let transform = Arc::new(TransformStage::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            warehouse,
        ));
        info!("Pipeline orchestrator ready");
        Self::new(config, registry, extraction, load, transform)
    }

    pub fn registry(&self) -> &Arc<BatchRegistry> {
        &self.registry
    }

    pub fn extraction(&self) -> &Arc<ExtractionStage> {
        &self.extraction
    }

    pub fn load(&self) -> &Arc<LoadStage> {
        &self.load
    }

    pub fn transform(&self) -> &Arc<TransformStage> {
        &self.transform
    }

    /// Run the stages the request asks for.
    ///
    /// Cancellation is checked before the first stage and between stages, and
    /// each stage checks it again at its own checkpoints.
    pub async fn run(
        &self,
        request: &PipelineRequest,
        cancel: &CancellationToken,
        progress: &ProgressHandle,
    ) -> StageOutcome<PipelineReport> {
        if stopped(cancel, STAGE, "before start", progress).await {
            return StageOutcome::Cancelled;
        }
        let started = Instant::now();
        let continue_on_failure = self.config.pipeline.continue_on_stage_failure;

        progress.info(BANNER).await;
        progress.info("PIPELINE STARTED").await;
        progress.info(BANNER).await;
        self.echo_request(request, progress).await;

        let mut report = PipelineReport::default();

        if request.skip_extraction {
            progress.info("Extraction skipped").await;
        } else {
            progress.info("Step 1/3: extraction").await;
            let result = match self
                .extraction
                .run(request.source_filter.as_deref(), cancel, progress)
                .await
            {
                StageOutcome::Completed(result) => result,
                StageOutcome::Cancelled => return StageOutcome::Cancelled,
            };
            let failed = !result.all_succeeded();
            report.extraction = Some(result);
            if failed {
                if !continue_on_failure {
                    return self
                        .halt(report, StageKind::Extraction, started, progress)
                        .await;
                }
                progress
                    .warn("Some sources failed, continuing with the remaining data")
                    .await;
            }
        }

        if stopped(cancel, STAGE, "between extraction and load", progress).await {
            return StageOutcome::Cancelled;
        }

        if request.skip_load {
            progress.info("Load skipped").await;
        } else {
            progress.info("Step 2/3: load").await;
            let loaded = match self.load.run(None, cancel, progress).await {
                StageOutcome::Completed(loaded) => loaded,
                StageOutcome::Cancelled => return StageOutcome::Cancelled,
            };
            report.load = Some(loaded);
            if !loaded {
                if !continue_on_failure {
                    return self.halt(report, StageKind::Load, started, progress).await;
                }
                progress
                    .warn("Load failed, transform will use the data already in the warehouse")
                    .await;
            }
        }

        if stopped(cancel, STAGE, "between load and transform", progress).await {
            return StageOutcome::Cancelled;
        }

        progress.info("Step 3/3: transform").await;
        match self.transform.run(None, cancel, progress).await {
            StageOutcome::Completed(result) => report.transform = Some(result),
            StageOutcome::Cancelled => return StageOutcome::Cancelled,
        }

        self.finish(&report, started, progress).await;
        StageOutcome::Completed(report)
    }

    async fn echo_request(&self, request: &PipelineRequest, progress: &ProgressHandle) {
        let yes_no = |flag: bool| if flag { "yes" } else { "no" };
        progress
            .info(format!(
                "Source: {}",
                request.source_filter.as_deref().unwrap_or("all active sources")
            ))
            .await;
        progress
            .info(format!("Skip extraction: {}", yes_no(request.skip_extraction)))
            .await;
        progress
            .info(format!("Skip load: {}", yes_no(request.skip_load)))
            .await;
        progress
            .info(format!(
                "Continue on stage failure: {}",
                yes_no(self.config.pipeline.continue_on_stage_failure)
            ))
            .await;
    }

    async fn halt(
        &self,
        mut report: PipelineReport,
        after: StageKind,
        started: Instant,
        progress: &ProgressHandle,
    ) -> StageOutcome<PipelineReport> {
        progress
            .error(format!("{after} reported failure, pipeline halted"))
            .await;
        report.halted_after = Some(after);
        self.finish(&report, started, progress).await;
        StageOutcome::Completed(report)
    }

    async fn finish(&self, report: &PipelineReport, started: Instant, progress: &ProgressHandle) {
        let elapsed = started.elapsed().as_secs_f64();
        progress.info(BANNER).await;
        if report.success() {
            progress
                .success(format!("PIPELINE FINISHED in {elapsed:.1}s"))
                .await;
            if let Some(url) = &self.config.dashboard_url {
                progress.info(format!("Dashboard: {url}")).await;
            }
        } else {
            progress
                .error(format!("PIPELINE FAILED after {elapsed:.1}s"))
                .await;
        }
        progress.info(BANNER).await;
        metrics::record_stage(STAGE, report.status_label(), elapsed);
    }
}
