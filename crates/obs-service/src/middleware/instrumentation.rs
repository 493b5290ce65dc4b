//! Request instrumentation middleware.
//!
//! Wraps every request except the metrics scrape and drives the three
//! signals in a fixed order once the final status is known:
//!
//! 1. close the trace span with the status code
//! 2. count the request and record its latency sample
//! 3. emit one structured log entry
//!
//! Finalization belongs to [`InFlightRequest`]. `finish` consumes it on
//! the normal path. If the response future is dropped first (client
//! disconnect), its `Drop` impl finalizes with status 499 instead, so
//! every request is finalized exactly once.
//!
//! Applied as the outermost layer so it sees the status written by the
//! terminal error stage and the panic handler.

use crate::config::METRICS_PATH;
use crate::errors::ErrorMessage;
use crate::observability::logging::{level_for_status, LogContext, LogLevel, StructuredLogger};
use crate::observability::metrics::{normalize_route, MetricsRegistry};
use crate::observability::spans::{SpanHandle, SpanTracker};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use serde_json::json;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::Instrument;

/// Status recorded when the client goes away before the response is ready.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Error message recorded for disconnected clients.
pub const CLIENT_DISCONNECT_MESSAGE: &str = "client disconnected before response completed";

/// Collaborators the middleware drives for each request.
pub struct Instrumentation {
    metrics: Arc<MetricsRegistry>,
    spans: SpanTracker,
    logger: StructuredLogger,
}

impl Instrumentation {
    pub fn new(metrics: Arc<MetricsRegistry>, spans: SpanTracker, logger: StructuredLogger) -> Self {
        Self {
            metrics,
            spans,
            logger,
        }
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// The scrape endpoint is never measured.
    pub fn is_excluded(path: &str) -> bool {
        path == METRICS_PATH
    }

    /// Start tracking one request: take the start time and open its span.
    pub fn begin(self: &Arc<Self>, method: &str, path: &str) -> InFlightRequest {
        let route = normalize_route(path);
        let span = self.spans.start_span(method, route);

        InFlightRequest {
            instrumentation: Arc::clone(self),
            context: RequestContext {
                method: method.to_string(),
                route,
                path: path.to_string(),
                started: Instant::now(),
            },
            span: Some(span),
        }
    }
}

/// Request-local data captured on arrival.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: String,
    pub route: &'static str,
    pub path: String,
    pub started: Instant,
}

/// Result of finalizing one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Finalized {
    pub status_code: u16,
    pub duration_ms: f64,
    pub level: LogLevel,
}

/// A request between `begin` and finalization.
pub struct InFlightRequest {
    instrumentation: Arc<Instrumentation>,
    context: RequestContext,
    span: Option<SpanHandle>,
}

impl InFlightRequest {
    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// The tracing span the downstream handler should run in.
    pub fn tracing_span(&self) -> tracing::Span {
        self.span
            .as_ref()
            .map(|handle| handle.tracing_span().clone())
            .unwrap_or_else(tracing::Span::none)
    }

    /// Finalize with the response's status and error message.
    pub fn finish(mut self, status_code: u16, error_message: Option<String>) -> Option<Finalized> {
        self.finalize(status_code, error_message)
    }

    fn finalize(&mut self, status_code: u16, error_message: Option<String>) -> Option<Finalized> {
        let handle = self.span.take()?;
        let duration_ms = self.context.started.elapsed().as_secs_f64() * 1000.0;
        let instrumentation = &self.instrumentation;

        instrumentation.spans.end_span(handle, status_code);

        instrumentation.metrics.record_request();
        instrumentation.metrics.observe_latency(
            &self.context.method,
            self.context.route,
            status_code,
            duration_ms,
        );

        let level = level_for_status(status_code);
        let mut context = LogContext::new();
        context.insert("method".to_string(), json!(self.context.method));
        context.insert("route".to_string(), json!(self.context.route));
        context.insert("path".to_string(), json!(self.context.path));
        context.insert("status_code".to_string(), json!(status_code));
        context.insert("duration".to_string(), json!(duration_ms));

        let message = match level {
            LogLevel::Info => format!("request on {} route", self.context.route),
            LogLevel::Error => {
                let error = error_message.unwrap_or_else(|| default_error_message(status_code));
                context.insert("errorMessage".to_string(), json!(error));
                format!("request on {} route failed", self.context.route)
            }
        };
        instrumentation.logger.log(level, message, context);

        Some(Finalized {
            status_code,
            duration_ms,
            level,
        })
    }
}

impl Drop for InFlightRequest {
    fn drop(&mut self) {
        if self.span.is_some() {
            self.finalize(
                CLIENT_CLOSED_REQUEST,
                Some(CLIENT_DISCONNECT_MESSAGE.to_string()),
            );
        }
    }
}

fn default_error_message(status_code: u16) -> String {
    axum::http::StatusCode::from_u16(status_code)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("Request failed")
        .to_string()
}

/// Middleware entry point.
pub async fn instrument_request(
    State(instrumentation): State<Arc<Instrumentation>>,
    request: Request,
    next: Next,
) -> Response {
    if Instrumentation::is_excluded(request.uri().path()) {
        return next.run(request).await;
    }

    let in_flight = instrumentation.begin(request.method().as_str(), request.uri().path());
    let span = in_flight.tracing_span();

    let response = next.run(request).instrument(span).await;

    let error_message = response
        .extensions()
        .get::<ErrorMessage>()
        .map(|message| message.0.clone());
    in_flight.finish(response.status().as_u16(), error_message);

    response
}
