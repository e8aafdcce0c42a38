use std::sync::Arc;

use siloflow_core::{
    Config, ObjectStore, PipelineOrchestrator, SanitizedConfig, SourceFetcher, Warehouse,
};

use crate::api::WsBroadcaster;
use crate::runs::RunManager;

/// Shared application state
pub struct AppState {
    config: Arc<Config>,
    orchestrator: Arc<PipelineOrchestrator>,
    runs: RunManager,
    ws_broadcaster: WsBroadcaster,
}

impl AppState {
    pub fn new(
        config: Config,
        fetcher: Arc<dyn SourceFetcher>,
        store: Arc<dyn ObjectStore>,
        warehouse: Arc<dyn Warehouse>,
    ) -> Self {
        let config = Arc::new(config);
        let orchestrator = Arc::new(PipelineOrchestrator::build(
            Arc::clone(&config),
            fetcher,
            store,
            warehouse,
        ));
        let ws_broadcaster = WsBroadcaster::default();
        let runs = RunManager::new(
            Arc::clone(&orchestrator),
            ws_broadcaster.clone(),
            config.pipeline.clone(),
            config.dashboard_url.clone(),
        );

        Self {
            config,
            orchestrator,
            runs,
            ws_broadcaster,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get sanitized config (source URL query strings redacted)
    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(self.config.as_ref())
    }

    pub fn orchestrator(&self) -> &Arc<PipelineOrchestrator> {
        &self.orchestrator
    }

    pub fn runs(&self) -> &RunManager {
        &self.runs
    }

    pub fn ws_broadcaster(&self) -> &WsBroadcaster {
        &self.ws_broadcaster
    }
}
