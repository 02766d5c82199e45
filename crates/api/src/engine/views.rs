//! Read models returned to callers.
//!
//! None of these are persisted. An [`ArtifactView`] is either the
//! placeholder shown while a job runs or the projection of the message a
//! completed job wrote; both carry the job id as their `id`.

use atelier_core::registry::ModelDescriptor;
use atelier_core::types::{DbId, JobId, Timestamp};
use atelier_db::models::job::Job;
use atelier_db::models::message::{Message, ASSISTANT_ROLE};
use serde::Serialize;

/// URL path serving an artifact's image bytes.
pub fn artifact_image_path(id: JobId) -> String {
    format!("/api/v1/artifacts/{id}/image")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactView {
    pub id: JobId,
    pub session_id: DbId,
    pub role: String,
    pub content: String,
    pub model: String,
    pub is_edit: bool,
    /// `true` until the job completes; a placeholder has no image.
    pub pending: bool,
    pub image_url: Option<String>,
    pub content_type: Option<String>,
    pub external_url: Option<String>,
    pub generation_ms: Option<i64>,
    pub created_at: Timestamp,
}

impl ArtifactView {
    pub fn placeholder(job: &Job) -> Self {
        Self {
            id: job.id,
            session_id: job.session_id,
            role: ASSISTANT_ROLE.to_string(),
            content: job.prompt.clone(),
            model: job.model_id.clone(),
            is_edit: job.params.is_edit(),
            pending: true,
            image_url: None,
            content_type: None,
            external_url: None,
            generation_ms: None,
            created_at: job.created_at,
        }
    }

    pub fn from_message(message: &Message) -> Self {
        Self {
            id: message.id,
            session_id: message.session_id,
            role: message.role.clone(),
            content: message.content.clone(),
            model: message.model_id.clone(),
            is_edit: message.is_edit,
            pending: false,
            image_url: Some(artifact_image_path(message.id)),
            content_type: Some(message.content_type.clone()),
            external_url: message.external_url.clone(),
            generation_ms: Some(message.generation_ms),
            created_at: message.created_at,
        }
    }
}

/// Response to an accepted submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub job: Job,
    pub placeholder_artifact: ArtifactView,
}

/// A job as seen by a poller; `artifact` is present once it completed.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub job: Job,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactView>,
}

/// A catalog entry plus whether this server can currently run it.
#[derive(Debug, Clone, Serialize)]
pub struct ModelView {
    #[serde(flatten)]
    pub model: ModelDescriptor,
    pub available: bool,
}
