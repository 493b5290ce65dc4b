//! Request-path error types.
//!
//! `AppError`'s `IntoResponse` impl is the single terminal error stage:
//! every failure a handler raises ends here, gets its status, and is
//! written as the uniform `{"status":"Error","error":...}` envelope.
//! Uncaught panics reach the same envelope through [`panic_response`].

use crate::workload::SimulatedFailure;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::any::Any;
use thiserror::Error;

/// Request-path error type.
///
/// Maps to HTTP status codes:
/// - Simulated, Panic: 500 Internal Server Error
/// - NotFound: 404 Not Found
/// - Handler: the status it carries
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Simulated(#[from] SimulatedFailure),

    #[error("{message}")]
    Handler { status: StatusCode, message: String },

    #[error("Cannot GET {0}")]
    NotFound(String),

    #[error("{0}")]
    Panic(String),
}

impl AppError {
    /// Handler error with the default 500 status.
    pub fn internal(message: impl Into<String>) -> Self {
        AppError::Handler {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    /// Handler error carrying its own status.
    pub fn with_status(status: StatusCode, message: impl Into<String>) -> Self {
        AppError::Handler {
            status,
            message: message.into(),
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Simulated(_) | AppError::Panic(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Handler { status, .. } => *status,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

/// Uniform error body.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub status: &'static str,
    pub error: String,
}

/// Error message attached to error responses as an extension.
///
/// The instrumentation middleware reads it to fill `errorMessage` in the
/// request log without parsing the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage(pub String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();

        let envelope = ErrorEnvelope {
            status: "Error",
            error: message.clone(),
        };

        let mut response = (status, Json(envelope)).into_response();
        response.extensions_mut().insert(ErrorMessage(message));
        response
    }
}

/// Terminal stage for panics caught by `CatchPanicLayer`.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "Internal Server Error".to_string()
    };

    tracing::error!(target: "obs.errors", panic = %message, "Handler panicked");
    AppError::Panic(message).into_response()
}
