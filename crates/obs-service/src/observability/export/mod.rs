//! Remote telemetry export.
//!
//! Log events: the Loki sink never does I/O on the request path. It
//! pushes into a bounded [`ExportQueue`] with `try_send`; a background
//! task started by [`run_export_loop`] batches the queue and ships
//! batches to Loki. When the queue is full the event is dropped and
//! counted in `telemetry_export_dropped_total`.
//!
//! Spans: [`build_tracer_provider`] builds the OpenTelemetry tracer
//! provider. With exporters enabled it carries a batch span processor
//! feeding the Zipkin exporter; otherwise spans are created and
//! discarded.
//!
//! # Shutdown
//!
//! On cancellation the Loki loop closes its receiver, drains what is
//! already queued, flushes it, and returns. [`Exporters::join`] then
//! shuts the tracer provider down, which flushes pending spans.

pub mod loki;

use crate::config::Config;
use crate::observability::logging::{ConsoleSink, LogSink};
use crate::observability::metrics::MetricsRegistry;
use opentelemetry_sdk::trace::{BatchConfigBuilder, BatchSpanProcessor, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use opentelemetry_zipkin::ZipkinExporter;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use loki::{LokiClient, LokiSink};

/// Default timeout for export requests in seconds.
pub const EXPORT_REQUEST_TIMEOUT_SECS: u64 = 5;

/// Largest batch sent in one export request.
pub const DEFAULT_MAX_BATCH: usize = 256;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Failed to build span exporter: {0}")]
    SpanExporter(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Backend rejected batch with status {status}")]
    Rejected { status: u16 },
}

/// Batching parameters for an export loop.
#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    pub max_batch: usize,
    pub flush_interval: Duration,
}

impl BatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_batch: DEFAULT_MAX_BATCH,
            flush_interval: Duration::from_millis(config.export_flush_interval_ms),
        }
    }
}

/// A warning is logged for the first drop and then once per this many.
pub const DROP_WARN_EVERY: u64 = 1000;

/// Bounded, non-blocking queue in front of an exporter task.
pub struct ExportQueue<T> {
    exporter: &'static str,
    sender: mpsc::Sender<T>,
    dropped: AtomicU64,
    metrics: Arc<MetricsRegistry>,
}

impl<T> ExportQueue<T> {
    /// Create a queue and the receiver its export loop consumes.
    ///
    /// Drops are counted in `metrics` under the `exporter` label.
    pub fn bounded(
        exporter: &'static str,
        capacity: usize,
        metrics: Arc<MetricsRegistry>,
    ) -> (Self, mpsc::Receiver<T>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let queue = Self {
            exporter,
            sender,
            dropped: AtomicU64::new(0),
            metrics,
        };
        (queue, receiver)
    }

    /// Enqueue without waiting. Returns false if the item was dropped.
    pub fn enqueue(&self, item: T) -> bool {
        let reason = match self.sender.try_send(item) {
            Ok(()) => return true,
            Err(TrySendError::Full(_)) => "queue full",
            Err(TrySendError::Closed(_)) => "queue closed",
        };

        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        self.metrics.record_export_drop(self.exporter);
        if dropped == 1 || dropped % DROP_WARN_EVERY == 0 {
            warn!(
                target: "obs.export",
                exporter = self.exporter,
                reason,
                dropped_total = dropped,
                "Dropping telemetry, exporter cannot keep up"
            );
        } else {
            debug!(
                target: "obs.export",
                exporter = self.exporter,
                reason,
                dropped_total = dropped,
                "Dropping telemetry"
            );
        }
        false
    }

    /// Items dropped because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Drive one exporter until cancelled.
///
/// `flush` is called with each non-empty batch. Its errors are logged
/// locally and the batch is discarded.
pub async fn run_export_loop<T, F, Fut>(
    exporter: &'static str,
    mut receiver: mpsc::Receiver<T>,
    settings: BatchSettings,
    cancel_token: CancellationToken,
    mut flush: F,
) where
    F: FnMut(Vec<T>) -> Fut,
    Fut: Future<Output = Result<(), ExportError>>,
{
    info!(
        target: "obs.export",
        exporter,
        max_batch = settings.max_batch,
        flush_interval_ms = settings.flush_interval.as_millis() as u64,
        "Starting exporter"
    );

    let max_batch = settings.max_batch.max(1);
    let mut interval = tokio::time::interval_at(
        tokio::time::Instant::now() + settings.flush_interval,
        settings.flush_interval,
    );
    let mut batch: Vec<T> = Vec::with_capacity(max_batch);

    loop {
        tokio::select! {
            item = receiver.recv() => match item {
                Some(item) => {
                    batch.push(item);
                    if batch.len() >= max_batch {
                        flush_batch(exporter, std::mem::take(&mut batch), &mut flush).await;
                    }
                }
                None => break,
            },
            _ = interval.tick() => {
                if !batch.is_empty() {
                    flush_batch(exporter, std::mem::take(&mut batch), &mut flush).await;
                }
            }
            _ = cancel_token.cancelled() => {
                info!(
                    target: "obs.export",
                    exporter,
                    "Exporter received shutdown signal, draining queue"
                );
                receiver.close();
                while let Some(item) = receiver.recv().await {
                    batch.push(item);
                }
                break;
            }
        }
    }

    while !batch.is_empty() {
        let rest = batch.split_off(batch.len().min(max_batch));
        flush_batch(exporter, batch, &mut flush).await;
        batch = rest;
    }

    info!(target: "obs.export", exporter, "Exporter stopped");
}

async fn flush_batch<T, F, Fut>(exporter: &'static str, batch: Vec<T>, flush: &mut F)
where
    F: FnMut(Vec<T>) -> Fut,
    Fut: Future<Output = Result<(), ExportError>>,
{
    let count = batch.len();
    match flush(batch).await {
        Ok(()) => debug!(target: "obs.export", exporter, count, "Exported batch"),
        Err(e) => warn!(
            target: "obs.export",
            exporter,
            error = %e,
            dropped = count,
            "Failed to export batch"
        ),
    }
}

/// Sinks, tracer provider and background tasks built from configuration.
pub struct Exporters {
    pub log_sinks: Vec<Arc<dyn LogSink>>,
    pub tracer_provider: SdkTracerProvider,
    pub tasks: Vec<JoinHandle<()>>,
}

impl Exporters {
    /// Wait for every exporter task to finish its final flush, then
    /// flush and shut down the tracer provider.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(target: "obs.export", error = %e, "Exporter task failed");
            }
        }

        let provider = self.tracer_provider;
        match tokio::task::spawn_blocking(move || provider.shutdown()).await {
            Ok(Ok(())) => debug!(target: "obs.export", "Tracer provider shut down"),
            Ok(Err(e)) => {
                warn!(target: "obs.export", error = %e, "Failed to shut down tracer provider")
            }
            Err(e) => {
                warn!(target: "obs.export", error = %e, "Tracer provider shutdown task failed")
            }
        }
    }
}

/// Build the configured sinks and spawn their exporter tasks.
///
/// The console log sink is always present. Loki and Zipkin are added
/// when exporters are enabled.
pub fn spawn_exporters(
    config: &Config,
    metrics: Arc<MetricsRegistry>,
    cancel_token: CancellationToken,
) -> Result<Exporters, ExportError> {
    let mut log_sinks: Vec<Arc<dyn LogSink>> = vec![Arc::new(ConsoleSink)];
    let mut tasks = Vec::new();
    let tracer_provider = build_tracer_provider(config)?;

    if !config.exporters_enabled {
        info!(target: "obs.export", "Remote exporters disabled");
        return Ok(Exporters {
            log_sinks,
            tracer_provider,
            tasks,
        });
    }

    let loki_client = LokiClient::new(&config.loki_url, config.loki_job.clone())?;
    let (loki_sink, loki_task) = loki::spawn(
        loki_client,
        config.export_queue_capacity,
        BatchSettings::from_config(config),
        metrics,
        cancel_token,
    );
    log_sinks.push(loki_sink);
    tasks.push(loki_task);

    Ok(Exporters {
        log_sinks,
        tracer_provider,
        tasks,
    })
}

/// Build the tracer provider for request spans.
///
/// Spans carry `service.name` from the config. With exporters enabled a
/// batch span processor ships them to `ZIPKIN_ENDPOINT`, using the
/// export queue capacity and flush interval from the config.
pub fn build_tracer_provider(config: &Config) -> Result<SdkTracerProvider, ExportError> {
    let resource = Resource::builder()
        .with_service_name(config.service_name.clone())
        .build();
    let mut builder = SdkTracerProvider::builder().with_resource(resource);

    if config.exporters_enabled {
        let exporter = build_zipkin_exporter(&config.zipkin_endpoint)?;
        let batch_config = BatchConfigBuilder::default()
            .with_max_queue_size(config.export_queue_capacity)
            .with_max_export_batch_size(DEFAULT_MAX_BATCH.min(config.export_queue_capacity))
            .with_scheduled_delay(Duration::from_millis(config.export_flush_interval_ms))
            .build();
        let processor = BatchSpanProcessor::builder(exporter)
            .with_batch_config(batch_config)
            .build();
        builder = builder.with_span_processor(processor);

        info!(
            target: "obs.export",
            endpoint = %config.zipkin_endpoint,
            "Exporting spans to Zipkin"
        );
    }

    Ok(builder.build())
}

fn build_zipkin_exporter(endpoint: &str) -> Result<ZipkinExporter, ExportError> {
    // The exporter's blocking HTTP client must not be created on a runtime thread.
    std::thread::scope(|scope| {
        scope
            .spawn(|| {
                ZipkinExporter::builder()
                    .with_collector_endpoint(endpoint.to_string())
                    .build()
                    .map_err(|e| ExportError::SpanExporter(e.to_string()))
            })
            .join()
            .map_err(|_| ExportError::SpanExporter("exporter builder panicked".to_string()))?
    })
}

pub(crate) fn build_http_client() -> Result<reqwest::Client, ExportError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(EXPORT_REQUEST_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(2))
        .build()
        .map_err(|e| ExportError::Client(e.to_string()))
}
