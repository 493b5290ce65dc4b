//! Prometheus metrics endpoint handler.
//!
//! The scrape endpoint samples the process metrics and renders the
//! registry. It is excluded from instrumentation, so scraping never
//! changes the request series it reports.

use crate::observability::metrics::{MetricsRegistry, PROMETHEUS_CONTENT_TYPE};
use axum::{extract::State, http::header, response::IntoResponse};
use std::sync::Arc;

/// Handler for GET /metrics
///
/// Returns 200 OK with Prometheus text format:
/// ```text
/// # HELP http_requests_total Total number of requests made
/// # TYPE http_requests_total counter
/// http_requests_total 42
/// ```
#[tracing::instrument(skip_all, name = "obs.metrics.scrape")]
pub async fn metrics_handler(State(registry): State<Arc<MetricsRegistry>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        registry.scrape(),
    )
}
