//! Assistant messages carrying generated images.

use atelier_core::types::{DbId, JobId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// Role recorded on every message written by the generation pipeline.
pub const ASSISTANT_ROLE: &str = "assistant";

/// A row from the `messages` table. `id` equals the producing job's id.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Message {
    pub id: JobId,
    pub session_id: DbId,
    pub role: String,
    pub content: String,
    /// Binary store key of the generated image.
    pub image_key: String,
    pub content_type: String,
    pub external_url: Option<String>,
    pub is_edit: bool,
    pub generation_ms: i64,
    pub model_id: String,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: JobId,
    pub session_id: DbId,
    pub content: String,
    pub image_key: String,
    pub content_type: String,
    pub external_url: Option<String>,
    pub is_edit: bool,
    pub generation_ms: i64,
    pub model_id: String,
}
