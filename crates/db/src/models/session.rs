use atelier_core::types::{DbId, JobId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `sessions` table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Session {
    pub id: DbId,
    pub owner_id: DbId,
    pub title: Option<String>,
    /// Latest generated image, used as the default reference for edits.
    pub current_reference_id: Option<JobId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
