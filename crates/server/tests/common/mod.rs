//! Common test utilities for in-process API testing with mocks.
//!
//! The fixture builds the full router over mock collaborators, so runs
//! launched through the API execute for real without touching the network
//! or the filesystem.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use siloflow_core::testing::{MockFetcher, MockObjectStore, MockWarehouse};
use siloflow_core::{Config, ObjectStore, SourceFetcher, Warehouse};
use siloflow_server::state::AppState;

/// Re-export fixtures for test convenience
pub use siloflow_core::testing::fixtures;

/// Test fixture with fully controllable collaborators.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_pipeline_run() {
///     let fixture = TestFixture::new();
///
///     let response = fixture.post("/api/v1/runs/pipeline", json!({})).await;
///     assert_eq!(response.status, 202);
///
///     let run = fixture.wait_for_run("pipeline").await;
///     assert_eq!(run["status"], "succeeded");
/// }
/// ```
pub struct TestFixture {
    pub router: Router,
    pub state: Arc<AppState>,
    pub fetcher: Arc<MockFetcher>,
    pub store: Arc<MockObjectStore>,
    pub warehouse: Arc<MockWarehouse>,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub text: String,
}

impl TestFixture {
    pub fn new() -> Self {
        Self::with_config(fixtures::config())
    }

    pub fn with_config(mut config: Config) -> Self {
        config.pipeline.relay_tick_ms = 10;
        config.pipeline.log_buffer_lines = 1000;

        let fetcher = Arc::new(MockFetcher::new());
        let store = Arc::new(MockObjectStore::new());
        let warehouse = Arc::new(MockWarehouse::new());

        let state = Arc::new(AppState::new(
            config,
            Arc::clone(&fetcher) as Arc<dyn SourceFetcher>,
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            Arc::clone(&warehouse) as Arc<dyn Warehouse>,
        ));
        let router = siloflow_server::api::create_router(Arc::clone(&state));

        Self {
            router,
            state,
            fetcher,
            store,
            warehouse,
        }
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Poll the run endpoint until the run of `kind` has finished and return its summary.
    pub async fn wait_for_run(&self, kind: &str) -> Value {
        let path = format!("/api/v1/runs/{kind}");
        for _ in 0..500 {
            let response = self.get(&path).await;
            assert_eq!(response.status, StatusCode::OK);
            if response.body["active"].is_null() && !response.body["last"].is_null() {
                return response.body["last"].clone();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run of kind {kind} did not finish in time");
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body_bytes).into_owned();
        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body, text }
    }
}
