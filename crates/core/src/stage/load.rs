use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::{stopped, StageKind, StageOutcome};
use crate::batch::{Batch, BatchToken, StagedObject};
use crate::config::Config;
use crate::metrics;
use crate::progress::{ProgressEvent, ProgressHandle};
use crate::registry::BatchRegistry;
use crate::warehouse::Warehouse;

const STAGE: StageKind = StageKind::Load;

/// Loads one staged batch into the raw tables, replacing their contents.
pub struct LoadStage {
    config: Arc<Config>,
    registry: Arc<BatchRegistry>,
    warehouse: Arc<dyn Warehouse>,
}

impl LoadStage {
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

    /// Load the batch `token`, or the most recent batch when `None`.
    ///
    /// The most recent batch is looked up on every call. Returns `false` when
    /// there is nothing to load or any table fails to load.
    pub async fn run(
        &self,
        token: Option<BatchToken>,
        cancel: &CancellationToken,
        progress: &ProgressHandle,
    ) -> StageOutcome<bool> {
        if stopped(cancel, STAGE, "before start", progress).await {
            return StageOutcome::Cancelled;
        }
        let started = Instant::now();

        let loaded = self.load(token, cancel, progress).await;
        let Some(success) = loaded else {
            return StageOutcome::Cancelled;
        };

        if stopped(cancel, STAGE, "after loading", progress).await {
            return StageOutcome::Cancelled;
        }
        let label = if success { "succeeded" } else { "failed" };
        metrics::record_stage(STAGE, label, started.elapsed().as_secs_f64());
        StageOutcome::Completed(success)
    }

    /// `None` when stopped between tables.
    async fn load(
        &self,
        token: Option<BatchToken>,
        cancel: &CancellationToken,
        progress: &ProgressHandle,
    ) -> Option<bool> {
        let Some(batch) = self.resolve_batch(token, progress).await else {
            return Some(false);
        };
        progress
            .info(format!(
                "Loading batch {} ({} object(s))",
                batch.token,
                batch.objects.len()
            ))
            .await;

        let groups = self.group_by_table(&batch, progress).await;
        if groups.is_empty() {
            progress
                .error(format!("Batch {} has no loadable objects", batch.token))
                .await;
            return Some(false);
        }

        let version = batch.token.data_version();
        let total = groups.len();
        progress
            .emit(ProgressEvent::StageStarted {
                stage: STAGE,
                total_items: total,
            })
            .await;

        for (index, (table, objects)) in groups.iter().enumerate() {
            if index > 0 && stopped(cancel, STAGE, "between tables", progress).await {
                return None;
            }

            let loaded = self.warehouse.replace_table(table, objects, &version).await;
            progress
                .emit(ProgressEvent::ItemCompleted {
                    stage: STAGE,
                    key: table.clone(),
                    success: loaded.is_ok(),
                    completed: index + 1,
                    total,
                })
                .await;

            match loaded {
                Ok(rows) => {
                    metrics::ROWS_LOADED.inc_by(rows);
                    progress
                        .success(format!("✓ Loaded {rows} row(s) into {table}"))
                        .await;
                }
                Err(e) => {
                    progress
                        .error(format!("✗ Load of {table} failed, aborting: {e}"))
                        .await;
                    progress
                        .emit(ProgressEvent::StageFinished {
                            stage: STAGE,
                            succeeded: index,
                            total,
                        })
                        .await;
                    return Some(false);
                }
            }
        }

        progress
            .emit(ProgressEvent::StageFinished {
                stage: STAGE,
                succeeded: total,
                total,
            })
            .await;
        progress
            .success(format!(
                "Load finished: batch {} is data version {}",
                batch.token, version
            ))
            .await;
        Some(true)
    }

    async fn resolve_batch(
        &self,
        token: Option<BatchToken>,
        progress: &ProgressHandle,
    ) -> Option<Batch> {
        let resolved = match token {
            Some(token) => self
                .registry
                .try_list_batches()
                .await
                .map(|batches| batches.into_iter().find(|b| b.token == token)),
            None => self.registry.latest_batch().await,
        };
        let batch = match resolved {
            Ok(batch) => batch,
            Err(e) => {
                progress.error(format!("Cannot list staged batches: {e}")).await;
                return None;
            }
        };
        if batch.is_none() {
            let wanted = token.map_or_else(|| "most recent".to_string(), |t| t.to_string());
            progress
                .error(format!("No staged objects found for batch {wanted}"))
                .await;
        }
        batch
    }

    /// Objects of the batch per target table, in source configuration order.
    async fn group_by_table(
        &self,
        batch: &Batch,
        progress: &ProgressHandle,
    ) -> Vec<(String, Vec<StagedObject>)> {
        let mut groups: Vec<(String, Vec<StagedObject>)> = Vec::new();
        for key in &batch.objects {
            let Some(object) = StagedObject::parse(key) else {
                continue;
            };
            let Some(source) = self
                .config
                .sources
                .iter()
                .find(|s| s.dataset_id == object.dataset_id)
            else {
                progress
                    .warn(format!("Skipping {key}: no source with dataset id '{}'", object.dataset_id))
                    .await;
                continue;
            };

            match groups.iter_mut().find(|(table, _)| *table == source.table) {
                Some((_, objects)) => objects.push(object),
                None => groups.push((source.table.clone(), vec![object])),
            }
        }

        let order = self.config.raw_tables();
        groups.sort_by_key(|(table, _)| order.iter().position(|t| t == table));
        groups
    }
}
