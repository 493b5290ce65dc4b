//! Handlers backed by the workload simulator.

use crate::errors::AppError;
use crate::models::SuccessResponse;
use crate::routes::AppState;
use axum::{extract::State, Json};
use std::sync::Arc;

/// Handler for GET /slow
///
/// Runs the simulated task. A simulated failure is forwarded to the
/// terminal error stage as a 500.
pub async fn slow(State(state): State<Arc<AppState>>) -> Result<Json<SuccessResponse>, AppError> {
    let duration_ms = state.simulator.run().await?;
    tracing::debug!(target: "obs.handlers", duration_ms, "Heavy task completed");

    Ok(Json(SuccessResponse::new(format!(
        "Heavy task completed in {}ms",
        duration_ms
    ))))
}

/// Handler for GET /error
///
/// Always fails with one of the canned failure reasons.
pub async fn inject_error(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SuccessResponse>, AppError> {
    Err(state.simulator.pick_failure().into())
}
