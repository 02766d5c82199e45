pub mod artifacts;
pub mod health;
pub mod jobs;
pub mod models;
pub mod sessions;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /models                                          model catalog
///
/// /sessions/{session_id}/generations               submit (POST, 202)
/// /sessions/{session_id}/jobs/outstanding          non-terminal jobs of a session
///
/// /jobs/outstanding                                non-terminal jobs of the caller
/// /jobs/{id}                                       status (+ artifact when completed)
/// /jobs/{id}/retry                                 resubmit a failed job (POST, 202)
///
/// /artifacts/{id}/image                            generated image bytes
/// ```
///
/// Every route requires a bearer token. `submission_limit` caps the body
/// of a generation submission, which carries inline reference images.
pub fn api_routes(submission_limit: usize) -> Router<AppState> {
    Router::new()
        .nest("/models", models::router())
        .nest("/sessions", sessions::router(submission_limit))
        .nest("/jobs", jobs::router())
        .nest("/artifacts", artifacts::router())
}
