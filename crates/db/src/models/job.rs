//! Generation job rows.

use atelier_core::job::JobStatus;
use atelier_core::params::GenerationParams;
use atelier_core::registry::ProviderKind;
use atelier_core::types::{DbId, JobId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `generation_jobs` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Job {
    pub id: JobId,
    pub session_id: DbId,
    pub owner_id: DbId,
    #[sqlx(rename = "status_id", try_from = "i16")]
    pub status: JobStatus,
    #[serde(rename = "model")]
    pub model_id: String,
    #[sqlx(try_from = "String")]
    #[serde(rename = "provider")]
    pub provider_kind: ProviderKind,
    pub prompt: String,
    #[sqlx(json)]
    pub params: GenerationParams,
    pub error_message: Option<String>,
    pub attempt_count: i32,
    pub retry_of_job_id: Option<JobId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Insert payload for a new job. Jobs are always created `pending`.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: JobId,
    pub session_id: DbId,
    pub owner_id: DbId,
    pub model_id: String,
    pub provider_kind: ProviderKind,
    pub prompt: String,
    pub params: GenerationParams,
    pub retry_of_job_id: Option<JobId>,
}
