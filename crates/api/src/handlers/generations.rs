//! Handlers for submitting generations into a session.
//!
//! All endpoints require authentication via [`AuthUser`].

use atelier_core::params::GenerationRequest;
use atelier_core::types::DbId;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/sessions/{session_id}/generations
///
/// Validate the request, create a `pending` job and start it in the
/// background. Returns 202 with the job and a placeholder artifact whose
/// id is the job id. Unknown models, models without a provider and
/// missing credentials are rejected here and create no job.
pub async fn submit_generation(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(session_id): Path<DbId>,
    Json(input): Json<GenerationRequest>,
) -> AppResult<impl IntoResponse> {
    let receipt = state
        .orchestrator
        .submit(auth.user_id, session_id, input)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: receipt })))
}

/// GET /api/v1/sessions/{session_id}/jobs/outstanding
///
/// Non-terminal jobs of the session, oldest first. Meant to be called once
/// after a reload to find jobs worth polling again.
pub async fn list_session_outstanding(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(session_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let jobs = state
        .orchestrator
        .list_outstanding(auth.user_id, session_id)
        .await?;
    Ok(Json(DataResponse { data: jobs }))
}
