//! Test harnesses for the observability service.
//!
//! `TestApp` drives the real router in-process with `oneshot`, which
//! works under a paused tokio clock. `TestServer` binds the same router
//! to `127.0.0.1:0` for tests that go through a real HTTP client.
//!
//! Both replace the remote exporters with a capturing log sink and an
//! in-memory span exporter, so every log event and span the
//! instrumentation emits can be asserted on.

use crate::sinks::{CapturedSpans, CapturingLogSink};
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use obs_service::middleware::Instrumentation;
use obs_service::observability::logging::{LogSink, StructuredLogger};
use obs_service::observability::metrics::MetricsRegistry;
use obs_service::observability::spans::SpanTracker;
use obs_service::routes::{self, AppState};
use obs_service::workload::WorkloadSimulator;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower::ServiceExt;

/// In-process application with capturing sinks.
pub struct TestApp {
    router: Router,
    metrics: Arc<MetricsRegistry>,
    instrumentation: Arc<Instrumentation>,
    logs: Arc<CapturingLogSink>,
    spans: CapturedSpans,
}

impl TestApp {
    /// Build the real service router around a seeded workload.
    pub fn new(seed: u64) -> Self {
        let mut app = Self::bare();
        let state = Arc::new(AppState {
            simulator: Arc::new(WorkloadSimulator::seeded(seed)),
            metrics: app.metrics.clone(),
        });
        app.router = routes::build_routes(state, app.instrumentation.clone());
        app
    }

    /// Wrap a custom router in the service's middleware stack.
    pub fn with_router(router: Router) -> Self {
        let mut app = Self::bare();
        app.router = routes::apply_layers(router, app.instrumentation.clone());
        app
    }

    fn bare() -> Self {
        let metrics = Arc::new(MetricsRegistry::new().expect("metrics registry should build"));
        let logs = CapturingLogSink::new();
        let spans = CapturedSpans::new();
        let instrumentation = Arc::new(Instrumentation::new(
            metrics.clone(),
            SpanTracker::new(spans.provider()),
            StructuredLogger::new(vec![logs.clone() as Arc<dyn LogSink>]),
        ));

        Self {
            router: Router::new(),
            metrics,
            instrumentation,
            logs,
            spans,
        }
    }

    /// Send a GET request through the router.
    pub async fn get(&self, path: &str) -> Response {
        let request = Request::builder()
            .uri(path)
            .body(Body::empty())
            .expect("request builder should succeed");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    /// Send a GET request and return the status and the body as text.
    pub async fn get_text(&self, path: &str) -> (u16, String) {
        let response = self.get(path).await;
        let status = response.status().as_u16();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body should be readable")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Send a GET request and parse the body as JSON.
    pub async fn get_json(&self, path: &str) -> (u16, serde_json::Value) {
        let (status, body) = self.get_text(path).await;
        let json = serde_json::from_str(&body).expect("body should be JSON");
        (status, json)
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Current exposition text of the registry.
    pub fn metrics_text(&self) -> String {
        self.metrics.render()
    }

    pub fn logs(&self) -> &CapturingLogSink {
        &self.logs
    }

    pub fn spans(&self) -> &CapturedSpans {
        &self.spans
    }
}

/// Test harness for spawning the service in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_home_e2e() -> Result<(), anyhow::Error> {
///     let server = TestServer::spawn(1).await?;
///
///     let response = reqwest::get(format!("{}/", server.url())).await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestServer {
    addr: SocketAddr,
    app: TestApp,
    _handle: JoinHandle<()>,
}

impl TestServer {
    /// Spawn a server around a seeded workload.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    pub async fn spawn(seed: u64) -> Result<Self, anyhow::Error> {
        Self::serve(TestApp::new(seed)).await
    }

    /// Spawn a server for an already-built app.
    pub async fn serve(app: TestApp) -> Result<Self, anyhow::Error> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let router = app.router();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            app,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn app(&self) -> &TestApp {
        &self.app
    }

    pub fn metrics_text(&self) -> String {
        self.app.metrics_text()
    }

    pub fn logs(&self) -> &CapturingLogSink {
        self.app.logs()
    }

    pub fn spans(&self) -> &CapturedSpans {
        self.app.spans()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // Abort the server task so the port is released when the test ends.
        self._handle.abort();
    }
}
