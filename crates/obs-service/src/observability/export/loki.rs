//! Loki log exporter.
//!
//! Events are pushed to `{base_url}/loki/api/v1/push` as JSON streams.
//! Each stream is labelled with `job` and `level`; each value is a
//! `[unix_nanos, json_line]` pair where the line is the serialized
//! [`LogEvent`].

use super::{build_http_client, run_export_loop, BatchSettings, ExportError, ExportQueue};
use crate::observability::logging::{LogEvent, LogSink};
use crate::observability::metrics::MetricsRegistry;
use reqwest::Client;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const PUSH_PATH: &str = "/loki/api/v1/push";

/// `exporter` label of this exporter's drop counter.
pub const EXPORTER_NAME: &str = "loki";

#[derive(Debug, Serialize)]
pub struct PushRequest {
    pub streams: Vec<Stream>,
}

#[derive(Debug, Serialize)]
pub struct Stream {
    pub stream: BTreeMap<&'static str, String>,
    pub values: Vec<[String; 2]>,
}

/// HTTP client for the Loki push API.
#[derive(Clone)]
pub struct LokiClient {
    client: Client,
    push_url: String,
    job: String,
}

impl LokiClient {
    /// Create a client for the Loki instance at `base_url`.
    pub fn new(base_url: &str, job: String) -> Result<Self, ExportError> {
        Ok(Self {
            client: build_http_client()?,
            push_url: format!("{}{}", base_url.trim_end_matches('/'), PUSH_PATH),
            job,
        })
    }

    /// Group events into one stream per level.
    pub fn build_payload(&self, events: &[LogEvent]) -> PushRequest {
        let mut by_level: BTreeMap<&'static str, Vec<[String; 2]>> = BTreeMap::new();

        for event in events {
            let line = match serde_json::to_string(event) {
                Ok(line) => line,
                Err(e) => {
                    warn!(target: "obs.export", error = %e, "Skipping unserializable log event");
                    continue;
                }
            };
            let nanos = event.timestamp.timestamp_nanos_opt().unwrap_or_default();
            by_level
                .entry(event.level.as_str())
                .or_default()
                .push([nanos.to_string(), line]);
        }

        let streams = by_level
            .into_iter()
            .map(|(level, values)| Stream {
                stream: BTreeMap::from([("job", self.job.clone()), ("level", level.to_string())]),
                values,
            })
            .collect();

        PushRequest { streams }
    }

    /// Push one batch.
    pub async fn push(&self, events: &[LogEvent]) -> Result<(), ExportError> {
        let payload = self.build_payload(events);
        if payload.streams.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .post(&self.push_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ExportError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ExportError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}

/// Log sink that queues events for the Loki exporter task.
pub struct LokiSink {
    queue: ExportQueue<LogEvent>,
}

impl LokiSink {
    /// Events dropped because the export queue was full.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }
}

impl LogSink for LokiSink {
    fn emit(&self, event: &LogEvent) {
        self.queue.enqueue(event.clone());
    }
}

/// Create a Loki sink and spawn the task that drains it.
pub fn spawn(
    client: LokiClient,
    capacity: usize,
    settings: BatchSettings,
    metrics: Arc<MetricsRegistry>,
    cancel_token: CancellationToken,
) -> (Arc<LokiSink>, JoinHandle<()>) {
    let (queue, receiver) = ExportQueue::bounded(EXPORTER_NAME, capacity, metrics);
    let client = Arc::new(client);

    let task = tokio::spawn(run_export_loop(
        EXPORTER_NAME,
        receiver,
        settings,
        cancel_token,
        move |batch: Vec<LogEvent>| {
            let client = client.clone();
            async move { client.push(&batch).await }
        },
    ));

    (Arc::new(LokiSink { queue }), task)
}
