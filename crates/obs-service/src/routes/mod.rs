//! HTTP routes.
//!
//! Defines the Axum router and application state.

use crate::config::METRICS_PATH;
use crate::errors;
use crate::handlers;
use crate::middleware::{instrument_request, Instrumentation};
use crate::observability::metrics::MetricsRegistry;
use crate::workload::WorkloadSimulator;
use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Randomized workload behind `/slow` and `/error`.
    pub simulator: Arc<WorkloadSimulator>,

    /// Registry shared with the instrumentation middleware.
    pub metrics: Arc<MetricsRegistry>,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/` - Static welcome page
/// - `/slow` - Simulated heavy task with injected failures
/// - `/error` - Always fails with a canned error
/// - `/metrics` - Prometheus scrape endpoint (not instrumented)
/// - JSON 404 fallback for everything else
pub fn build_routes(state: Arc<AppState>, instrumentation: Arc<Instrumentation>) -> Router {
    let app_routes = Router::new()
        .route("/", get(handlers::home))
        .route("/slow", get(handlers::slow))
        .route("/error", get(handlers::inject_error))
        .with_state(state.clone());

    // Metrics route with its own state
    let metrics_routes = Router::new()
        .route(METRICS_PATH, get(handlers::metrics_handler))
        .with_state(state.metrics.clone());

    let router = app_routes
        .merge(metrics_routes)
        .fallback(handlers::not_found);

    apply_layers(router, instrumentation)
}

/// Wrap a router in the service's middleware stack.
///
/// Layer order (outermost first):
/// 1. instrumentation - finalizes every response, including panics
/// 2. TraceLayer - request tracing
/// 3. CatchPanicLayer - turns a panic into the error envelope
pub fn apply_layers(router: Router, instrumentation: Arc<Instrumentation>) -> Router {
    router
        .layer(CatchPanicLayer::custom(errors::panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn_with_state(
            instrumentation,
            instrument_request,
        ))
}
