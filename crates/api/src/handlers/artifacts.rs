//! Handlers for generated artifacts.

use atelier_core::types::JobId;
use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::IntoResponse;

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::state::AppState;

/// GET /api/v1/artifacts/{id}/image
///
/// Raw image bytes of a completed job's artifact, served with the content
/// type recorded when it was stored. 404 until the job completes.
pub async fn get_artifact_image(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let object = state
        .orchestrator
        .artifact_image(auth.user_id, job_id)
        .await?;

    Ok((
        [
            (CONTENT_TYPE, object.content_type),
            (CACHE_CONTROL, "private, max-age=31536000, immutable".to_string()),
        ],
        object.bytes,
    ))
}
