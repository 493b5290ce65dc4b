//! HTTP request handlers.

pub mod home;
pub mod metrics;
pub mod not_found;
pub mod workload;

pub use home::home;
pub use metrics::metrics_handler;
pub use not_found::not_found;
pub use workload::{inject_error, slow};
