use axum::routing::get;
use axum::Router;

use crate::handlers::artifacts;
use crate::state::AppState;

/// Routes mounted at `/artifacts`.
///
/// ```text
/// GET    /{id}/image      -> get_artifact_image
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/{id}/image", get(artifacts::get_artifact_image))
}
