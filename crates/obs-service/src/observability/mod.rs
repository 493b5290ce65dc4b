//! Observability components driven by the instrumentation middleware.
//!
//! - `metrics` - request counter and latency histogram
//! - `spans` - per-request trace spans
//! - `logging` - structured request logs and `tracing` setup
//! - `export` - background shipping to Loki and Zipkin

pub mod export;
pub mod logging;
pub mod metrics;
pub mod spans;
