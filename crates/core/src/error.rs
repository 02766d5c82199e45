use crate::registry::ProviderKind;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Reasons a generation request is rejected before any job row exists.
///
/// Every variant is raised synchronously by the submit path; none of them
/// ever reaches a persisted job's `error_message`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("Unknown model '{0}'")]
    UnknownModel(String),

    #[error("No provider is registered for model '{0}'")]
    NoProvider(String),

    #[error("Model '{model_id}' requires a {provider} credential and none is stored for this account")]
    MissingCredential {
        model_id: String,
        provider: ProviderKind,
    },

    #[error("{0}")]
    Validation(String),
}
