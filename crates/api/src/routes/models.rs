use axum::routing::get;
use axum::Router;

use crate::handlers::models;
use crate::state::AppState;

/// Routes mounted at `/models`.
///
/// ```text
/// GET    /                -> list_models
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(models::list_models))
}
