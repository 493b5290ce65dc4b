//! HTTP middleware.
//!
//! - `instrumentation` - per-request metrics, span and structured log

pub mod instrumentation;

pub use instrumentation::{instrument_request, InFlightRequest, Instrumentation};
