//! Request metrics.
//!
//! Metrics follow Prometheus naming conventions:
//! - `_total` suffix for counters
//! - unit suffix for histograms (`_milliseconds`)
//!
//! # Registry
//!
//! `MetricsRegistry` owns its own `PrometheusRecorder`, built but never
//! installed as the global recorder. It is constructed once at startup
//! and shared by `Arc` between the instrumentation middleware (writer)
//! and the scrape handler (reader). Writes go through
//! `metrics::with_local_recorder`, so tests can build as many isolated
//! registries as they need.
//!
//! # Process metrics
//!
//! A `metrics_process::Collector` adds the standard `process_*` series
//! (CPU time, resident memory, open file descriptors, start time). They
//! are sampled on every scrape by [`MetricsRegistry::scrape`].
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `method`: HTTP methods
//! - `route`: the service's known routes, everything else `/other`
//! - `status_code`: HTTP status codes
//! - `exporter`: the fixed set of remote exporters

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{
    BuildError, Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder,
};
use metrics_process::Collector;
use thiserror::Error;

/// Total requests counter.
pub const REQUEST_COUNTER: &str = "http_requests_total";

/// Request latency histogram.
pub const LATENCY_HISTOGRAM: &str = "http_request_duration_milliseconds";

/// Telemetry items dropped before reaching a remote exporter.
pub const EXPORT_DROPPED_COUNTER: &str = "telemetry_export_dropped_total";

/// Latency bucket upper bounds in milliseconds. Larger values land in `+Inf`.
pub const LATENCY_BUCKETS_MS: [f64; 9] = [
    1.0, 50.0, 100.0, 200.0, 400.0, 500.0, 800.0, 1000.0, 2000.0,
];

/// `Content-Type` of the text exposition format.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Failed to configure latency buckets: {0}")]
    Buckets(#[from] BuildError),
}

/// Process-wide request counter and latency histogram.
pub struct MetricsRegistry {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
    process: Collector,
}

impl MetricsRegistry {
    /// Build an empty registry with the latency buckets configured.
    pub fn new() -> Result<Self, MetricsError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full(LATENCY_HISTOGRAM.to_string()),
                &LATENCY_BUCKETS_MS,
            )?
            .build_recorder();
        let handle = recorder.handle();
        let process = Collector::default();

        metrics::with_local_recorder(&recorder, || {
            describe_counter!(REQUEST_COUNTER, "Total number of requests made");
            describe_histogram!(
                LATENCY_HISTOGRAM,
                Unit::Milliseconds,
                "Time taken to serve a request and send the response"
            );
            describe_counter!(
                EXPORT_DROPPED_COUNTER,
                "Log events dropped because an exporter queue was full or closed"
            );
            process.describe();
        });

        Ok(Self {
            recorder,
            handle,
            process,
        })
    }

    /// Count one completed request.
    pub fn record_request(&self) {
        metrics::with_local_recorder(&self.recorder, || {
            counter!(REQUEST_COUNTER).increment(1);
        });
    }

    /// Add one latency sample.
    pub fn observe_latency(&self, method: &str, route: &str, status_code: u16, duration_ms: f64) {
        metrics::with_local_recorder(&self.recorder, || {
            histogram!(LATENCY_HISTOGRAM,
                "method" => method.to_string(),
                "route" => route.to_string(),
                "status_code" => status_code.to_string()
            )
            .record(duration_ms);
        });
    }

    /// Count one telemetry item an exporter had to drop.
    pub fn record_export_drop(&self, exporter: &'static str) {
        metrics::with_local_recorder(&self.recorder, || {
            counter!(EXPORT_DROPPED_COUNTER, "exporter" => exporter).increment(1);
        });
    }

    /// Sample the process metrics, then render. Used by the scrape endpoint.
    pub fn scrape(&self) -> String {
        metrics::with_local_recorder(&self.recorder, || self.process.collect());
        self.render()
    }

    /// Render the registry in Prometheus text format. Read-only.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Normalize a request path to a bounded route label.
pub fn normalize_route(path: &str) -> &'static str {
    match path {
        "/" => "/",
        "/slow" => "/slow",
        "/error" => "/error",
        "/metrics" => "/metrics",
        _ => "/other",
    }
}
