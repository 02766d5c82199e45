//! Route definitions for the `/jobs` resource.
//!
//! All endpoints require authentication.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /outstanding     -> list_outstanding
/// GET    /{id}            -> get_job
/// POST   /{id}/retry      -> retry_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/outstanding", get(jobs::list_outstanding))
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/retry", post(jobs::retry_job))
}
