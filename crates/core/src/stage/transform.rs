use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::{stopped, Outcome, StageKind, StageOutcome, StageResult};
use crate::batch::DataVersion;
use crate::config::{Config, ViewConfig};
use crate::metrics;
use crate::progress::{ProgressEvent, ProgressHandle};
use crate::registry::BatchRegistry;
use crate::warehouse::Warehouse;

const STAGE: StageKind = StageKind::Transform;

/// Failure reason recorded for every view when no data version exists.
pub const NO_VERSION_REASON: &str = "no data version available";

/// Substitute `{project}`, `{dataset}` and `{timestamp}` in a view query.
pub fn render_query(template: &str, project: &str, dataset: &str, version: &DataVersion) -> String {
    template
        .replace("{project}", project)
        .replace("{dataset}", dataset)
        .replace("{timestamp}", &version.to_string())
}

/// Rebuilds the configured views over one data version.
pub struct TransformStage {
    config: Arc<Config>,
    registry: Arc<BatchRegistry>,
    warehouse: Arc<dyn Warehouse>,
}

impl TransformStage {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<BatchRegistry>,
        warehouse: Arc<dyn Warehouse>,
    ) -> Self {
        Self {
            config,
            registry,
            warehouse,
        }
    }

    /// Build every view over `version`, or over the most recent data version
    /// when `None`.
    ///
    /// Views are built in configuration order and each one is attempted even
    /// if an earlier one failed, unless `skip_failed_dependents` is set.
    pub async fn run(
        &self,
        version: Option<DataVersion>,
        cancel: &CancellationToken,
        progress: &ProgressHandle,
    ) -> StageOutcome<StageResult> {
        if stopped(cancel, STAGE, "before start", progress).await {
            return StageOutcome::Cancelled;
        }
        let started = Instant::now();
        let views = &self.config.views;

        let version = match version {
            Some(version) => Some(version),
            None => self.latest_version(progress).await,
        };

        progress
            .emit(ProgressEvent::StageStarted {
                stage: STAGE,
                total_items: views.len(),
            })
            .await;

        let mut result = StageResult::new();
        match version {
            Some(version) => {
                progress
                    .info(format!(
                        "Building {} view(s) over data version {}",
                        views.len(),
                        version
                    ))
                    .await;
                for (index, view) in views.iter().enumerate() {
                    if index > 0 && stopped(cancel, STAGE, "between views", progress).await {
                        return StageOutcome::Cancelled;
                    }
                    let outcome = self.build_view(view, &version, &result, progress).await;
                    let success = outcome.is_success();
                    result.record(view.name.clone(), outcome);
                    self.item_completed(progress, &view.name, success, index + 1)
                        .await;
                }
            }
            None => {
                progress
                    .error("No data version available, no view can be built")
                    .await;
                for (index, view) in views.iter().enumerate() {
                    result.record(view.name.clone(), Outcome::Failed(NO_VERSION_REASON.to_string()));
                    self.item_completed(progress, &view.name, false, index + 1)
                        .await;
                }
            }
        }

        progress
            .emit(ProgressEvent::StageFinished {
                stage: STAGE,
                succeeded: result.succeeded_count(),
                total: result.len(),
            })
            .await;
        if stopped(cancel, STAGE, "after the last view", progress).await {
            return StageOutcome::Cancelled;
        }

        let summary = format!(
            "Transform finished: {}/{} view(s) built",
            result.succeeded_count(),
            result.len()
        );
        if result.all_succeeded() {
            progress.success(summary).await;
            if let Some(url) = &self.config.dashboard_url {
                progress.info(format!("Dashboard: {url}")).await;
            }
        } else {
            progress.warn(summary).await;
        }

        metrics::record_items(STAGE, &result);
        metrics::record_stage(STAGE, result.status_label(), started.elapsed().as_secs_f64());
        StageOutcome::Completed(result)
    }

    async fn latest_version(&self, progress: &ProgressHandle) -> Option<DataVersion> {
        match self.registry.latest_version().await {
            Ok(version) => version,
            Err(e) => {
                progress.error(format!("Cannot resolve data version: {e}")).await;
                None
            }
        }
    }

    async fn build_view(
        &self,
        view: &ViewConfig,
        version: &DataVersion,
        built: &StageResult,
        progress: &ProgressHandle,
    ) -> Outcome {
        if self.config.pipeline.skip_failed_dependents {
            let failed = view
                .depends_on
                .iter()
                .find(|dep| built.get(dep).is_some_and(|o| !o.is_success()));
            if let Some(dep) = failed {
                progress
                    .warn(format!("Skipping {}: dependency {} did not build", view.name, dep))
                    .await;
                return Outcome::Skipped(format!("dependency '{dep}' did not build"));
            }
        }

        let sql = render_query(
            &view.query,
            &self.config.warehouse.project_id,
            &self.config.warehouse.dataset,
            version,
        );
        match self.warehouse.create_or_replace_view(&view.name, &sql).await {
            Ok(()) => {
                progress.success(format!("✓ View {} created", view.name)).await;
                Outcome::Succeeded
            }
            Err(e) => {
                progress
                    .error(format!("✗ View {} failed: {}", view.name, e))
                    .await;
                Outcome::Failed(e.to_string())
            }
        }
    }

    async fn item_completed(
        &self,
        progress: &ProgressHandle,
        key: &str,
        success: bool,
        completed: usize,
    ) {
        progress
            .emit(ProgressEvent::ItemCompleted {
                stage: STAGE,
                key: key.to_string(),
                success,
                completed,
                total: self.config.views.len(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchToken;
    use crate::storage::ObjectStore;
    use crate::testing::{fixtures, MockObjectStore, MockWarehouse};

    fn stage(config: Config, warehouse: &Arc<MockWarehouse>) -> TransformStage {
        let config = Arc::new(config);
        let registry = Arc::new(BatchRegistry::new(
            &config,
            Arc::new(MockObjectStore::new()) as Arc<dyn ObjectStore>,
            Arc::clone(warehouse) as Arc<dyn Warehouse>,
        ));
        TransformStage::new(config, registry, Arc::clone(warehouse) as Arc<dyn Warehouse>)
    }

    fn version(s: &str) -> DataVersion {
        BatchToken::parse(s).unwrap().data_version()
    }

    async fn run(stage: &TransformStage, version: Option<DataVersion>) -> StageResult {
        stage
            .run(version, &CancellationToken::new(), &ProgressHandle::disabled())
            .await
            .completed()
            .expect("not cancelled")
    }

    #[test]
    fn test_render_query_placeholders() {
        let sql = render_query(
            "SELECT * FROM `{project}.{dataset}.ratios` WHERE extraction_timestamp = '{timestamp}'",
            "acme",
            "finance",
            &version("20240115_14-30-05"),
        );
        assert_eq!(
            sql,
            "SELECT * FROM `acme.finance.ratios` WHERE extraction_timestamp = '2024-01-15 14:30:05'"
        );
    }

    #[tokio::test]
    async fn test_builds_views_over_latest_version() {
        let warehouse = Arc::new(MockWarehouse::new());
        warehouse.add_version("ratios_raw", version("20240101_00-00-00")).await;
        warehouse.add_version("ratios_raw", version("20240115_14-30-05")).await;
        let stage = stage(fixtures::config(), &warehouse);

        let result = run(&stage, None).await;

        assert!(result.all_succeeded());
        let views = warehouse.recorded_views().await;
        let names: Vec<&str> = views.iter().map(|v| v.view.as_str()).collect();
        assert_eq!(names, vec!["ratios_clean", "stock_clean", "dashboard_view"]);
        assert!(views[0].sql.contains("'2024-01-15 14:30:05'"));
    }

    #[tokio::test]
    async fn test_explicit_version_is_used() {
        let warehouse = Arc::new(MockWarehouse::new());
        warehouse.add_version("ratios_raw", version("20240115_14-30-05")).await;
        let stage = stage(fixtures::config(), &warehouse);

        run(&stage, Some(version("20240101_00-00-00"))).await;

        let sql = warehouse.view_sql("ratios_clean").await.unwrap();
        assert!(sql.contains("'2024-01-01 00:00:00'"));
    }

    #[tokio::test]
    async fn test_no_version_fails_every_view() {
        let warehouse = Arc::new(MockWarehouse::new());
        let stage = stage(fixtures::config(), &warehouse);

        let result = run(&stage, None).await;

        assert_eq!(result.len(), 3);
        assert_eq!(result.succeeded_count(), 0);
        assert_eq!(
            result.get("dashboard_view"),
            Some(&Outcome::Failed(NO_VERSION_REASON.to_string()))
        );
        assert_eq!(warehouse.view_call_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_view_does_not_block_later_views() {
        let warehouse = Arc::new(MockWarehouse::new());
        warehouse.add_version("ratios_raw", version("20240115_14-30-05")).await;
        warehouse.fail_view("stock_clean").await;
        let stage = stage(fixtures::config(), &warehouse);

        let result = run(&stage, None).await;

        // the dependent view is still attempted against whatever stock_clean was before
        assert_eq!(warehouse.view_call_count().await, 3);
        assert_eq!(result.get("ratios_clean"), Some(&Outcome::Succeeded));
        assert!(matches!(result.get("stock_clean"), Some(Outcome::Failed(_))));
        assert_eq!(result.get("dashboard_view"), Some(&Outcome::Succeeded));
    }

    #[tokio::test]
    async fn test_skip_failed_dependents() {
        let warehouse = Arc::new(MockWarehouse::new());
        warehouse.add_version("ratios_raw", version("20240115_14-30-05")).await;
        warehouse.fail_view("stock_clean").await;
        let mut config = fixtures::config();
        config.pipeline.skip_failed_dependents = true;
        let stage = stage(config, &warehouse);

        let result = run(&stage, None).await;

        assert_eq!(warehouse.view_call_count().await, 2);
        assert!(matches!(
            result.get("dashboard_view"),
            Some(Outcome::Skipped(reason)) if reason.contains("stock_clean")
        ));
        assert_eq!(result.as_map().get("dashboard_view"), Some(&false));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_builds_nothing() {
        let warehouse = Arc::new(MockWarehouse::new());
        warehouse.add_version("ratios_raw", version("20240115_14-30-05")).await;
        let stage = stage(fixtures::config(), &warehouse);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = stage.run(None, &cancel, &ProgressHandle::disabled()).await;

        assert!(outcome.is_cancelled());
        assert_eq!(warehouse.view_call_count().await, 0);
    }
}
