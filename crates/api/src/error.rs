use atelier_core::error::{CoreError, SubmitError};
use atelier_core::storage::StorageError;
use atelier_db::StoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps the domain, persistence and binary-store errors.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `atelier_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A generation request rejected before any job was created.
    #[error(transparent)]
    Submit(#[from] SubmitError),

    /// A job/session/credential store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A binary store error.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                CoreError::Unauthorized(msg) => {
                    (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
                }
                CoreError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
                CoreError::Internal(msg) => internal(msg),
            },

            // --- Submission rejections ---
            AppError::Submit(submit) => {
                let (status, code) = match submit {
                    SubmitError::UnknownModel(_) => (StatusCode::BAD_REQUEST, "UNKNOWN_MODEL"),
                    SubmitError::NoProvider(_) => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "NO_PROVIDER")
                    }
                    SubmitError::MissingCredential { .. } => {
                        (StatusCode::BAD_REQUEST, "MISSING_CREDENTIAL")
                    }
                    SubmitError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                };
                (status, code, submit.to_string())
            }

            // --- Store errors ---
            AppError::Store(store) => match store {
                StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", store.to_string()),
                StoreError::DuplicateJob(_)
                | StoreError::DuplicateMessage(_)
                | StoreError::InvalidTransition { .. } => {
                    (StatusCode::CONFLICT, "CONFLICT", store.to_string())
                }
                StoreError::Database(err) => classify_sqlx_error(err),
            },

            AppError::Storage(err) => internal(&err.to_string()),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn internal(msg: &str) -> (StatusCode, &'static str, String) {
    tracing::error!(error = %msg, "Internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

/// Classify a sqlx error into an HTTP status, error code, and message.
///
/// - `RowNotFound` maps to 404.
/// - Unique constraint violations (constraint name starting with `uq_`) map to 409.
/// - Everything else maps to 500 with a sanitized message.
fn classify_sqlx_error(err: &sqlx::Error) -> (StatusCode, &'static str, String) {
    match err {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Resource not found".to_string(),
        ),
        sqlx::Error::Database(db_err) => {
            // PostgreSQL unique constraint violation: error code 23505
            if db_err.code().as_deref() == Some("23505") {
                let constraint = db_err.constraint().unwrap_or("unknown");
                if constraint.starts_with("uq_") {
                    return (
                        StatusCode::CONFLICT,
                        "CONFLICT",
                        format!("Duplicate value violates unique constraint: {constraint}"),
                    );
                }
            }
            internal(&db_err.to_string())
        }
        other => internal(&other.to_string()),
    }
}
