//! Service configuration.
//!
//! Configuration is loaded from environment variables. Every value has a
//! fixed default so the service starts with no environment at all.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8000;

/// Default listen host.
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Default service name reported to the trace collector.
pub const DEFAULT_SERVICE_NAME: &str = "obs-service";

/// Default Loki base URL.
pub const DEFAULT_LOKI_URL: &str = "http://127.0.0.1:3100";

/// Default Zipkin span ingestion endpoint.
pub const DEFAULT_ZIPKIN_ENDPOINT: &str = "http://localhost:9411/api/v2/spans";

/// Default capacity of each exporter queue.
pub const DEFAULT_EXPORT_QUEUE_CAPACITY: usize = 1024;

/// Default exporter flush interval in milliseconds.
pub const DEFAULT_EXPORT_FLUSH_INTERVAL_MS: u64 = 1000;

/// Path of the Prometheus scrape endpoint.
pub const METRICS_PATH: &str = "/metrics";

/// Console log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable `fmt` output.
    Pretty,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::InvalidLogFormat(format!(
                "LOG_FORMAT must be 'pretty' or 'json', got '{}'",
                other
            ))),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen port (default: 8000).
    pub port: u16,

    /// Server bind address, `"{BIND_HOST}:{PORT}"`.
    pub bind_address: String,

    /// Service name attached to exported spans.
    pub service_name: String,

    /// Loki base URL; logs are pushed to `{loki_url}/loki/api/v1/push`.
    pub loki_url: String,

    /// Value of the `job` label on pushed log streams.
    pub loki_job: String,

    /// Zipkin v2 span ingestion endpoint.
    pub zipkin_endpoint: String,

    /// When false, only the console log sink is installed.
    pub exporters_enabled: bool,

    /// Bounded capacity of each exporter queue.
    pub export_queue_capacity: usize,

    /// Interval between exporter flushes in milliseconds.
    pub export_flush_interval_ms: u64,

    /// Console log format.
    pub log_format: LogFormat,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid port configuration: {0}")]
    InvalidPort(String),

    #[error("Invalid service name: {0}")]
    InvalidServiceName(String),

    #[error("Invalid boolean configuration: {0}")]
    InvalidBool(String),

    #[error("Invalid exporter configuration: {0}")]
    InvalidExporter(String),

    #[error("Invalid log format: {0}")]
    InvalidLogFormat(String),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: format!("{}:{}", DEFAULT_BIND_HOST, DEFAULT_PORT),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            loki_url: DEFAULT_LOKI_URL.to_string(),
            loki_job: DEFAULT_SERVICE_NAME.to_string(),
            zipkin_endpoint: DEFAULT_ZIPKIN_ENDPOINT.to_string(),
            exporters_enabled: true,
            export_queue_capacity: DEFAULT_EXPORT_QUEUE_CAPACITY,
            export_flush_interval_ms: DEFAULT_EXPORT_FLUSH_INTERVAL_MS,
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = if let Some(value_str) = vars.get("PORT") {
            let value: u16 = value_str.parse().map_err(|e| {
                ConfigError::InvalidPort(format!(
                    "PORT must be a valid port number, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 {
                return Err(ConfigError::InvalidPort(
                    "PORT must be greater than 0".to_string(),
                ));
            }

            value
        } else {
            DEFAULT_PORT
        };

        let bind_host = vars
            .get("BIND_HOST")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_HOST.to_string());

        let service_name = vars
            .get("SERVICE_NAME")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string());

        if service_name.trim().is_empty() {
            return Err(ConfigError::InvalidServiceName(
                "SERVICE_NAME must not be empty".to_string(),
            ));
        }

        let loki_url = vars
            .get("LOKI_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOKI_URL.to_string());

        let loki_job = vars
            .get("LOKI_JOB")
            .cloned()
            .unwrap_or_else(|| service_name.clone());

        let zipkin_endpoint = vars
            .get("ZIPKIN_ENDPOINT")
            .cloned()
            .unwrap_or_else(|| DEFAULT_ZIPKIN_ENDPOINT.to_string());

        let exporters_enabled = match vars.get("EXPORTERS_ENABLED") {
            Some(value_str) => parse_bool("EXPORTERS_ENABLED", value_str)?,
            None => true,
        };

        let export_queue_capacity = if let Some(value_str) = vars.get("EXPORT_QUEUE_CAPACITY") {
            let value: usize = value_str.parse().map_err(|e| {
                ConfigError::InvalidExporter(format!(
                    "EXPORT_QUEUE_CAPACITY must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 {
                return Err(ConfigError::InvalidExporter(
                    "EXPORT_QUEUE_CAPACITY must be greater than 0".to_string(),
                ));
            }

            value
        } else {
            DEFAULT_EXPORT_QUEUE_CAPACITY
        };

        let export_flush_interval_ms =
            if let Some(value_str) = vars.get("EXPORT_FLUSH_INTERVAL_MS") {
                let value: u64 = value_str.parse().map_err(|e| {
                    ConfigError::InvalidExporter(format!(
                        "EXPORT_FLUSH_INTERVAL_MS must be a valid positive integer, got '{}': {}",
                        value_str, e
                    ))
                })?;

                if value == 0 {
                    return Err(ConfigError::InvalidExporter(
                        "EXPORT_FLUSH_INTERVAL_MS must be greater than 0".to_string(),
                    ));
                }

                value
            } else {
                DEFAULT_EXPORT_FLUSH_INTERVAL_MS
            };

        let log_format = match vars.get("LOG_FORMAT") {
            Some(value_str) => value_str.parse()?,
            None => LogFormat::Pretty,
        };

        Ok(Config {
            port,
            bind_address: format!("{}:{}", bind_host, port),
            service_name,
            loki_url,
            loki_job,
            zipkin_endpoint,
            exporters_enabled,
            export_queue_capacity,
            export_flush_interval_ms,
            log_format,
        })
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidBool(format!(
            "{} must be 'true' or 'false', got '{}'",
            name, value
        ))),
    }
}
