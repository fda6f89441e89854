//! Common test utilities for API testing with mocks.
//!
//! This module provides a test fixture that builds the router in-process
//! with a real SQLite store and mock providers, download client and
//! metadata extractor, so the API can be exercised without indexers or
//! download clients.

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use bookbag_core::{
    dispatch::Dispatcher,
    notify::NotifierHandle,
    postprocess::{FileMetadataExtractor, LibraryConfig, Reconciler},
    provider::{MediaKind, PipelineConfig, ProviderAdapter, ProviderPipeline},
    testing::{MockDownloadClient, MockProvider},
    Config, LibraryStore, Scheduler, SchedulerConfig, SqliteLibraryStore,
};

/// Re-export fixtures for test convenience
pub use bookbag_core::testing::fixtures;

/// Test fixture for API testing with mock dependencies.
///
/// The scheduler is built but never started; tests trigger searches and
/// post-processing through the API.
pub struct TestFixture {
    pub router: Router,
    /// Mock torrent indexer - configure search results
    pub provider: Arc<MockProvider>,
    /// Mock download client bound to torrents
    pub client: Arc<MockDownloadClient>,
    pub store: Arc<dyn LibraryStore>,
    /// Drop folder scanned on each post-process pass
    pub drop_dir: PathBuf,
    pub library_dir: PathBuf,
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let library_dir = temp_dir.path().join("library");
        let downloads = temp_dir.path().join("downloads");
        let drop_dir = temp_dir.path().join("drop");
        for dir in [&library_dir, &downloads, &drop_dir] {
            std::fs::create_dir_all(dir).expect("Failed to create dir");
        }

        let mut config = Config::new(
            LibraryConfig::new(&library_dir, &downloads).with_untracked_dir(&drop_dir),
        );
        config.server.host = std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST);
        config.database.path = temp_dir.path().join("bookbag.db");

        let store: Arc<dyn LibraryStore> = Arc::new(
            SqliteLibraryStore::new(&config.database.path)
                .expect("Failed to create library store"),
        );

        let provider = Arc::new(MockProvider::new("tracker", 1, MediaKind::Torrent));
        let client = Arc::new(MockDownloadClient::new("qbittorrent"));

        let adapters: Vec<Arc<dyn ProviderAdapter>> =
            vec![Arc::clone(&provider) as Arc<dyn ProviderAdapter>];
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            NotifierHandle::disabled(),
            config.snatch.max_snatch_attempts,
        )
        .with_client(MediaKind::Torrent, client.clone());
        let reconciler = Reconciler::new(
            Arc::clone(&store),
            Arc::new(FileMetadataExtractor::new()),
            config.library.clone(),
            NotifierHandle::disabled(),
        );
        let scheduler = Arc::new(Scheduler::new(
            SchedulerConfig::default(),
            Arc::clone(&store),
            ProviderPipeline::new(adapters, PipelineConfig::default()),
            dispatcher,
            reconciler,
            config.snatch.clone(),
            config.matching.clone(),
        ));

        let state = Arc::new(bookbag_server::state::AppState::new(
            config,
            Arc::clone(&store),
            scheduler,
        ));
        let router = bookbag_server::api::create_router(state);

        Self {
            router,
            provider,
            client,
            store,
            drop_dir,
            library_dir,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
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

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Get the raw text body of a GET request.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        self.send(request_builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
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

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
