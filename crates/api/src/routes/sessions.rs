//! Generation routes scoped to a session.
//!
//! Session CRUD lives elsewhere; only the generation endpoints are mounted here.

use atelier_core::registry::ModelRegistry;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::handlers::generations;
use crate::state::AppState;

/// Room for the prompt, the other fields and `data:` URL headers.
const SUBMISSION_HEADROOM_BYTES: usize = 256 * 1024;

/// Never go below axum's own default body limit.
const MIN_SUBMISSION_BYTES: usize = 2 * 1024 * 1024;

/// Body limit for a submission: the largest reference payload any model
/// accepts, base64-encoded with line-wrapping slack, plus headroom.
pub fn submission_body_limit(registry: &ModelRegistry) -> usize {
    let encoded = registry.largest_reference_payload().div_ceil(3) * 4;
    (encoded + encoded / 16 + SUBMISSION_HEADROOM_BYTES).max(MIN_SUBMISSION_BYTES)
}

/// Routes mounted at `/sessions`.
///
/// ```text
/// POST   /{session_id}/generations          -> submit_generation
/// GET    /{session_id}/jobs/outstanding     -> list_session_outstanding
/// ```
pub fn router(submission_limit: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/{session_id}/generations",
            post(generations::submit_generation)
                .layer(DefaultBodyLimit::max(submission_limit)),
        )
        .route(
            "/{session_id}/jobs/outstanding",
            get(generations::list_session_outstanding),
        )
}
