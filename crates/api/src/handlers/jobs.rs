//! Handlers for polling and retrying generation jobs.
//!
//! All endpoints require authentication via [`AuthUser`]. Callers only
//! ever see their own jobs.

use atelier_core::types::JobId;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}
///
/// The job, plus its artifact once it has completed.
pub async fn get_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let status = state.orchestrator.get_status(auth.user_id, job_id).await?;
    Ok(Json(DataResponse { data: status }))
}

/// GET /api/v1/jobs/outstanding
///
/// Non-terminal jobs across all of the caller's sessions, oldest first.
pub async fn list_outstanding(
    auth: AuthUser,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let jobs = state
        .orchestrator
        .list_outstanding_for_owner(auth.user_id)
        .await?;
    Ok(Json(DataResponse { data: jobs }))
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/retry
///
/// Re-submit a failed job's parameters as a new job. Returns 202 like a
/// fresh submission; 409 if the job has not failed.
pub async fn retry_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let receipt = state.orchestrator.retry(auth.user_id, job_id).await?;

    tracing::info!(
        job_id = %receipt.job.id,
        retry_of = %job_id,
        user_id = auth.user_id,
        "Job retried",
    );

    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: receipt })))
}
