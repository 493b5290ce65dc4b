//! Fallback for unknown routes.

use crate::errors::AppError;
use axum::http::Uri;

/// Answers every unrouted request with the JSON error envelope and 404.
pub async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(uri.path().to_string())
}
