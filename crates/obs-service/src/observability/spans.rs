//! Per-request trace spans.
//!
//! Spans are `tracing` spans recorded by a `tracing-opentelemetry` layer
//! into the tracer provider the tracker was built with. The provider
//! assigns trace and span ids, batches finished spans and hands them to
//! its exporter (Zipkin in production, in-memory in tests).
//!
//! Each tracker owns a private `Dispatch`, so request spans never depend
//! on the process-wide subscriber and several trackers can coexist in one
//! process.
//!
//! `end_span` consumes the [`SpanHandle`], so a span cannot be closed
//! twice.

use opentelemetry::trace::{TraceContextExt, TracerProvider as _};
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{field, Dispatch};
use tracing_opentelemetry::OpenTelemetrySpanExt;
use tracing_subscriber::layer::SubscriberExt;

/// Instrumentation scope name of request spans.
pub const TRACER_NAME: &str = "obs-service";

/// A span that has been started and not yet ended.
#[derive(Debug)]
pub struct SpanHandle {
    span: tracing::Span,
    trace_id: String,
    name: String,
    method: String,
    route: String,
    started: Instant,
}

impl SpanHandle {
    /// The `tracing` span that downstream work should run inside.
    pub fn tracing_span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Summary of a closed span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedSpan {
    pub trace_id: String,
    pub name: String,
    pub method: String,
    pub route: String,
    pub status_code: u16,
    pub duration: Duration,
}

/// Opens and closes request spans.
#[derive(Clone)]
pub struct SpanTracker {
    dispatch: Dispatch,
    // Keeps the provider, and with it the span pipeline, alive.
    _provider: SdkTracerProvider,
}

impl SpanTracker {
    pub fn new(provider: &SdkTracerProvider) -> Self {
        let tracer = provider.tracer(TRACER_NAME);
        let subscriber =
            tracing_subscriber::registry().with(tracing_opentelemetry::layer().with_tracer(tracer));

        Self {
            dispatch: Dispatch::new(subscriber),
            _provider: provider.clone(),
        }
    }

    /// Open a server span named after the method and route.
    pub fn start_span(&self, method: &str, route: &str) -> SpanHandle {
        let name = format!("{} {}", method, route);

        let span = tracing::dispatcher::with_default(&self.dispatch, || {
            tracing::info_span!(
                "http.request",
                otel.name = %name,
                otel.kind = "server",
                otel.status_code = field::Empty,
                http.request.method = %method,
                http.route = %route,
                http.response.status_code = field::Empty,
            )
        });
        let trace_id = span.context().span().span_context().trace_id().to_string();

        SpanHandle {
            span,
            trace_id,
            name,
            method: method.to_string(),
            route: route.to_string(),
            started: Instant::now(),
        }
    }

    /// Record the final status and close the span.
    pub fn end_span(&self, handle: SpanHandle, status_code: u16) -> FinishedSpan {
        let SpanHandle {
            span,
            trace_id,
            name,
            method,
            route,
            started,
        } = handle;

        span.record("http.response.status_code", i64::from(status_code));
        if status_code >= 500 {
            span.record("otel.status_code", "error");
        }
        let duration = started.elapsed();
        drop(span);

        FinishedSpan {
            trace_id,
            name,
            method,
            route,
            status_code,
            duration,
        }
    }
}


#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::test_support::{exported_status_codes, in_memory_tracker};
    use super::*;
    use opentelemetry::trace::{SpanKind, Status};

    #[test]
    fn test_start_span_names_and_ids() {
        let (tracker, _exporter) = in_memory_tracker();
        let handle = tracker.start_span("GET", "/slow");

        assert_eq!(handle.name(), "GET /slow");
        assert_eq!(handle.trace_id().len(), 32);
        assert!(handle.trace_id().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(handle.trace_id(), "0".repeat(32));
    }

    #[test]
    fn test_ids_differ_between_spans() {
        let (tracker, _exporter) = in_memory_tracker();
        let first = tracker.start_span("GET", "/");
        let second = tracker.start_span("GET", "/");

        assert_ne!(first.trace_id(), second.trace_id());
    }

    #[test]
    fn test_span_is_exported_only_when_ended() {
        let (tracker, exporter) = in_memory_tracker();

        let handle = tracker.start_span("GET", "/error");
        assert!(exporter.get_finished_spans().unwrap().is_empty());

        let finished = tracker.end_span(handle, 500);
        assert_eq!(finished.status_code, 500);
        assert_eq!(finished.method, "GET");
        assert_eq!(finished.route, "/error");

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        let span = spans.first().unwrap();
        assert_eq!(span.name, "GET /error");
        assert_eq!(span.span_kind, SpanKind::Server);
        assert_eq!(span.span_context.trace_id().to_string(), finished.trace_id);
        assert!(span.start_time <= span.end_time);
        assert!(matches!(span.status, Status::Error { .. }));
        assert_eq!(exported_status_codes(&exporter), vec![500]);
    }

    #[test]
    fn test_success_span_attributes() {
        let (tracker, exporter) = in_memory_tracker();

        let handle = tracker.start_span("GET", "/");
        tracker.end_span(handle, 200);

        let spans = exporter.get_finished_spans().unwrap();
        let span = spans.first().unwrap();
        let attribute = |key: &str| {
            span.attributes
                .iter()
                .find(|kv| kv.key.as_str() == key)
                .map(|kv| kv.value.as_str().into_owned())
        };
        assert_eq!(attribute("http.request.method").as_deref(), Some("GET"));
        assert_eq!(attribute("http.route").as_deref(), Some("/"));
        assert_eq!(attribute("http.response.status_code").as_deref(), Some("200"));
        assert!(!matches!(span.status, Status::Error { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_tracks_elapsed_time() {
        let (tracker, _exporter) = in_memory_tracker();
        let handle = tracker.start_span("GET", "/slow");

        tokio::time::sleep(Duration::from_millis(300)).await;
        let finished = tracker.end_span(handle, 200);

        assert!(finished.duration >= Duration::from_millis(300));
    }
}
