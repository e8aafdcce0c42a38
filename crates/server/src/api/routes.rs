use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use super::{handlers, middleware::metrics_middleware, registry, runs, ws};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let dashboard_dir = state.config().server.dashboard_dir.clone();

    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Registry
        .route("/overview", get(registry::overview))
        .route("/sources", get(registry::list_sources))
        .route("/batches", get(registry::list_batches))
        .route("/versions", get(registry::list_versions))
        // Runs
        .route("/runs", get(runs::list_runs))
        .route("/runs/{kind}", get(runs::get_run).post(runs::launch_run))
        .route("/runs/{kind}/stop", post(runs::stop_run))
        // Live run logs
        .route("/ws", get(ws::ws_handler))
        .with_state(Arc::clone(&state));

    let router = Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics).with_state(state));

    // Serve the dashboard with SPA fallback when configured
    let router = match dashboard_dir {
        Some(dir) => {
            let index_path = dir.join("index.html");
            router.fallback_service(ServeDir::new(&dir).fallback(ServeFile::new(index_path)))
        }
        None => router,
    };

    router
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
