//! Request observability service library.
//!
//! An HTTP service whose every request is measured, traced and logged
//! exactly once, plus a fault-injecting workload to exercise that path.
//!
//! # Modules
//!
//! - `config` - Service configuration
//! - `errors` - Error types and the terminal error stage
//! - `handlers` - HTTP request handlers
//! - `middleware` - Request instrumentation
//! - `models` - Response bodies
//! - `observability` - Metrics, spans, logs and their exporters
//! - `routes` - Router and application state
//! - `workload` - Randomized slow task with injected failures

pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod routes;
pub mod workload;
