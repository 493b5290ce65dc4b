//! Sinks that keep everything they receive for later assertions.

use obs_service::observability::logging::{LogEvent, LogLevel, LogSink};
use opentelemetry_sdk::trace::{
    InMemorySpanExporter, InMemorySpanExporterBuilder, SdkTracerProvider,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

/// Log sink recording every event in arrival order.
#[derive(Default)]
pub struct CapturingLogSink {
    events: Mutex<Vec<LogEvent>>,
}

impl CapturingLogSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of the events received so far.
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of events at the given level.
    pub fn count_level(&self, level: LogLevel) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.level == level)
            .count()
    }

    /// The only event received. Panics unless exactly one arrived.
    pub fn single(&self) -> LogEvent {
        let events = self.events();
        assert_eq!(events.len(), 1, "expected exactly one log event: {events:?}");
        events.into_iter().next().unwrap()
    }
}

impl LogSink for CapturingLogSink {
    fn emit(&self, event: &LogEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// A span as exported by the tracer provider.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSpan {
    pub name: String,
    pub trace_id: String,
    pub status_code: u16,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub attributes: BTreeMap<String, String>,
}

/// Tracer provider that exports finished spans synchronously into memory.
pub struct CapturedSpans {
    exporter: InMemorySpanExporter,
    provider: SdkTracerProvider,
}

impl Default for CapturedSpans {
    fn default() -> Self {
        let exporter = InMemorySpanExporterBuilder::new().build();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        Self { exporter, provider }
    }
}

impl CapturedSpans {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider to build the `SpanTracker` from.
    pub fn provider(&self) -> &SdkTracerProvider {
        &self.provider
    }

    /// Snapshot of the spans finished so far, in export order.
    pub fn spans(&self) -> Vec<RecordedSpan> {
        self.exporter
            .get_finished_spans()
            .expect("in-memory exporter should be readable")
            .into_iter()
            .map(|span| {
                let attributes: BTreeMap<String, String> = span
                    .attributes
                    .iter()
                    .map(|kv| (kv.key.as_str().to_string(), kv.value.as_str().into_owned()))
                    .collect();
                let status_code = attributes
                    .get("http.response.status_code")
                    .and_then(|code| code.parse().ok())
                    .expect("request span should carry a status code");
                RecordedSpan {
                    name: span.name.to_string(),
                    trace_id: span.span_context.trace_id().to_string(),
                    status_code,
                    start_time: span.start_time,
                    end_time: span.end_time,
                    attributes,
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.spans().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The only span exported. Panics unless exactly one arrived.
    pub fn single(&self) -> RecordedSpan {
        let spans = self.spans();
        assert_eq!(spans.len(), 1, "expected exactly one span: {spans:?}");
        spans.into_iter().next().unwrap()
    }
}
