//! Structured request logging.
//!
//! `StructuredLogger` turns a message and a context map into a
//! timestamped [`LogEvent`] and hands it to every configured sink. The
//! console sink always receives events; remote sinks (Loki) enqueue
//! them without blocking.
//!
//! Sinks are infallible from the caller's side. Delivery is best-effort
//! and a sink never reports failure back into the request path.
//!
//! Process diagnostics (startup, exporter failures, handler debug) go
//! straight through `tracing` and are not `LogEvent`s.

use crate::config::LogFormat;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Key/value context attached to a log event.
pub type LogContext = Map<String, Value>;

/// Log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Error => "error",
        }
    }
}

/// Level selection policy: 2xx is info, everything else is error.
pub fn level_for_status(status_code: u16) -> LogLevel {
    match status_code {
        200..=299 => LogLevel::Info,
        _ => LogLevel::Error,
    }
}

/// A formatted log entry. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub context: LogContext,
}

/// Destination for log events.
pub trait LogSink: Send + Sync {
    /// Deliver one event. Must not block on remote I/O and must not fail.
    fn emit(&self, event: &LogEvent);
}

/// Local sink: re-emits events through `tracing` on target `obs.request`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn emit(&self, event: &LogEvent) {
        let details = Value::Object(event.context.clone());
        match event.level {
            LogLevel::Info => {
                tracing::info!(target: "obs.request", details = %details, "{}", event.message)
            }
            LogLevel::Error => {
                tracing::error!(target: "obs.request", details = %details, "{}", event.message)
            }
        }
    }
}

/// Fan-out logger used by the instrumentation middleware.
#[derive(Clone)]
pub struct StructuredLogger {
    sinks: Vec<Arc<dyn LogSink>>,
}

impl StructuredLogger {
    pub fn new(sinks: Vec<Arc<dyn LogSink>>) -> Self {
        Self { sinks }
    }

    /// Logger that only writes to the console.
    pub fn console() -> Self {
        Self::new(vec![Arc::new(ConsoleSink) as Arc<dyn LogSink>])
    }

    pub fn log_info(&self, message: impl Into<String>, context: LogContext) {
        self.log(LogLevel::Info, message, context);
    }

    pub fn log_error(&self, message: impl Into<String>, context: LogContext) {
        self.log(LogLevel::Error, message, context);
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>, context: LogContext) {
        let event = LogEvent {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            context,
        };

        for sink in &self.sinks {
            sink.emit(&event);
        }
    }
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing(format: LogFormat) {
    let registry = tracing_subscriber::registry().with(
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "obs_service=info,obs=info,tower_http=info".into()),
    );

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
