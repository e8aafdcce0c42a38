use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::{stopped, Outcome, StageKind, StageOutcome, StageResult};
use crate::batch::{BatchToken, StagedObject};
use crate::config::{Config, SourceConfig};
use crate::fetcher::SourceFetcher;
use crate::metrics;
use crate::progress::{ProgressEvent, ProgressHandle};
use crate::storage::ObjectStore;

const STAGE: StageKind = StageKind::Extraction;

/// Downloads active sources and stages them as one batch.
pub struct ExtractionStage {
    config: Arc<Config>,
    fetcher: Arc<dyn SourceFetcher>,
    store: Arc<dyn ObjectStore>,
}

impl ExtractionStage {
    pub fn new(
        config: Arc<Config>,
        fetcher: Arc<dyn SourceFetcher>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            config,
            fetcher,
            store,
        }
    }

    /// Extract the active sources, or only the one named by `source_filter`.
    ///
    /// Every object written by one call shares a single batch token. A failing
    /// source is recorded and the next one is attempted.
    pub async fn run(
        &self,
        source_filter: Option<&str>,
        cancel: &CancellationToken,
        progress: &ProgressHandle,
    ) -> StageOutcome<StageResult> {
        if stopped(cancel, STAGE, "before start", progress).await {
            return StageOutcome::Cancelled;
        }
        let started = Instant::now();

        let sources: Vec<&SourceConfig> = self
            .config
            .active_sources()
            .filter(|s| source_filter.map_or(true, |name| s.name == name))
            .collect();
        if let (Some(name), true) = (source_filter, sources.is_empty()) {
            progress
                .warn(format!("Source '{name}' is not an active source, nothing to extract"))
                .await;
        }

        let token = BatchToken::now();
        progress
            .info(format!(
                "Starting extraction of {} source(s) into batch {}",
                sources.len(),
                token
            ))
            .await;
        progress
            .emit(ProgressEvent::StageStarted {
                stage: STAGE,
                total_items: sources.len(),
            })
            .await;

        let mut result = StageResult::new();
        for (index, source) in sources.iter().enumerate() {
            if index > 0 && stopped(cancel, STAGE, "between sources", progress).await {
                return StageOutcome::Cancelled;
            }

            progress.info(format!("Fetching {}", source.name)).await;
            let outcome = self.extract_source(source, &token, progress).await;
            let success = outcome.is_success();
            result.record(source.name.clone(), outcome);

            progress
                .emit(ProgressEvent::ItemCompleted {
                    stage: STAGE,
                    key: source.name.clone(),
                    success,
                    completed: index + 1,
                    total: sources.len(),
                })
                .await;
        }

        progress
            .emit(ProgressEvent::StageFinished {
                stage: STAGE,
                succeeded: result.succeeded_count(),
                total: result.len(),
            })
            .await;
        if stopped(cancel, STAGE, "after the last source", progress).await {
            return StageOutcome::Cancelled;
        }

        let summary = format!(
            "Extraction finished: {}/{} source(s) staged in batch {}",
            result.succeeded_count(),
            result.len(),
            token
        );
        if result.all_succeeded() {
            progress.success(summary).await;
        } else {
            progress.warn(summary).await;
        }

        metrics::record_items(STAGE, &result);
        metrics::record_stage(STAGE, result.status_label(), started.elapsed().as_secs_f64());
        StageOutcome::Completed(result)
    }

    async fn extract_source(
        &self,
        source: &SourceConfig,
        token: &BatchToken,
        progress: &ProgressHandle,
    ) -> Outcome {
        let data = match self.fetcher.fetch(source).await {
            Ok(data) => data,
            Err(e) => {
                progress
                    .error(format!("✗ {} could not be fetched: {}", source.name, e))
                    .await;
                return Outcome::Failed(format!("fetch failed: {e}"));
            }
        };

        let key = StagedObject::key_for(
            &self.config.storage.raw_prefix,
            &source.dataset_id,
            token,
            source.format.extension(),
        );
        let bytes = data.len();
        match self.store.put_object(&key, data).await {
            Ok(()) => {
                progress
                    .success(format!("✓ {} staged as {} ({} bytes)", source.name, key, bytes))
                    .await;
                Outcome::Succeeded
            }
            Err(e) => {
                progress
                    .error(format!("✗ {} could not be staged: {}", source.name, e))
                    .await;
                Outcome::Failed(format!("upload failed: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, MockFetcher, MockObjectStore};

    fn three_sources() -> Config {
        fixtures::config_with(
            vec![
                fixtures::source("ratios", "ratios", "ratios_raw", true),
                fixtures::source("stock", "stock", "stock_raw", true),
                fixtures::source("fx", "fx", "fx_raw", true),
            ],
            Vec::new(),
        )
    }

    fn stage(
        config: Config,
        fetcher: &Arc<MockFetcher>,
        store: &Arc<MockObjectStore>,
    ) -> ExtractionStage {
        ExtractionStage::new(
            Arc::new(config),
            Arc::clone(fetcher) as Arc<dyn SourceFetcher>,
            Arc::clone(store) as Arc<dyn ObjectStore>,
        )
    }

    #[tokio::test]
    async fn test_one_failing_source_does_not_abort_others() {
        let fetcher = Arc::new(MockFetcher::new());
        let store = Arc::new(MockObjectStore::new());
        fetcher.fail_source("stock").await;
        let stage = stage(three_sources(), &fetcher, &store);

        let result = stage
            .run(None, &CancellationToken::new(), &ProgressHandle::disabled())
            .await
            .completed()
            .expect("not cancelled");

        let map = result.as_map();
        assert_eq!(map.len(), 3);
        assert_eq!(map.values().filter(|ok| !**ok).count(), 1);
        assert_eq!(map.get("stock"), Some(&false));
        assert_eq!(fetcher.fetch_count().await, 3);
        assert_eq!(store.put_count().await, 2);
    }

    #[tokio::test]
    async fn test_objects_share_one_batch_token() {
        let fetcher = Arc::new(MockFetcher::new());
        let store = Arc::new(MockObjectStore::new());
        let stage = stage(three_sources(), &fetcher, &store);

        stage
            .run(None, &CancellationToken::new(), &ProgressHandle::disabled())
            .await;

        let tokens: Vec<BatchToken> = store
            .recorded_puts()
            .await
            .iter()
            .map(|key| StagedObject::parse(key).expect("staged name").token)
            .collect();
        assert_eq!(tokens.len(), 3);
        assert!(tokens.iter().all(|t| *t == tokens[0]));
    }

    #[tokio::test]
    async fn test_keys_follow_naming_convention() {
        let fetcher = Arc::new(MockFetcher::new());
        let store = Arc::new(MockObjectStore::new());
        let stage = stage(fixtures::config(), &fetcher, &store);

        stage
            .run(Some("ratios"), &CancellationToken::new(), &ProgressHandle::disabled())
            .await;

        let puts = store.recorded_puts().await;
        assert_eq!(puts.len(), 1);
        let object = StagedObject::parse(&puts[0]).unwrap();
        assert!(puts[0].starts_with("raw/ratios__"));
        assert_eq!(object.dataset_id, "ratios");
        assert_eq!(object.extension.as_deref(), Some("csv"));
    }

    #[tokio::test]
    async fn test_inactive_sources_are_not_attempted() {
        let fetcher = Arc::new(MockFetcher::new());
        let store = Arc::new(MockObjectStore::new());
        let stage = stage(fixtures::abc_config(), &fetcher, &store);

        let result = stage
            .run(None, &CancellationToken::new(), &ProgressHandle::disabled())
            .await
            .completed()
            .unwrap();

        assert_eq!(fetcher.recorded_fetches().await, vec!["A", "B"]);
        assert!(result.get("C").is_none());

        // Filtering on an inactive source attempts nothing
        let result = stage
            .run(Some("C"), &CancellationToken::new(), &ProgressHandle::disabled())
            .await
            .completed()
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(fetcher.fetch_count().await, 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_fetches_nothing() {
        let fetcher = Arc::new(MockFetcher::new());
        let store = Arc::new(MockObjectStore::new());
        let stage = stage(three_sources(), &fetcher, &store);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = stage.run(None, &cancel, &ProgressHandle::disabled()).await;

        assert!(outcome.is_cancelled());
        assert_eq!(fetcher.fetch_count().await, 0);
        assert_eq!(store.put_count().await, 0);
    }

    #[tokio::test]
    async fn test_upload_failure_is_recorded() {
        let fetcher = Arc::new(MockFetcher::new());
        let store = Arc::new(MockObjectStore::new());
        store.set_fail_put(true).await;
        let stage = stage(fixtures::config(), &fetcher, &store);

        let result = stage
            .run(None, &CancellationToken::new(), &ProgressHandle::disabled())
            .await
            .completed()
            .unwrap();

        assert_eq!(result.succeeded_count(), 0);
        match result.get("ratios") {
            Some(Outcome::Failed(reason)) => assert!(reason.starts_with("upload failed")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
