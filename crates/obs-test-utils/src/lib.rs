//! # Obs Test Utilities
//!
//! Shared test utilities for the observability service.
//!
//! This crate provides:
//! - A capturing log sink (`CapturingLogSink`) and an in-memory span
//!   exporter (`CapturedSpans`)
//! - Prometheus exposition parsing helpers (`exposition`)
//! - In-process app harness (`TestApp`, driven with `oneshot`)
//! - Server test harness (`TestServer` for E2E tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use obs_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<(), anyhow::Error> {
//!     let server = TestServer::spawn(7).await?;
//!
//!     let response = reqwest::get(format!("{}/", server.url())).await?;
//!     assert_eq!(response.status(), 200);
//!     assert_eq!(server.logs().len(), 1);
//!     Ok(())
//! }
//! ```

pub mod exposition;
pub mod server_harness;
pub mod sinks;

// Re-export commonly used items
pub use server_harness::*;
pub use sinks::*;
