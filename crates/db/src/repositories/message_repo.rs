//! Repository for the `messages` table.

use atelier_core::types::JobId;
use sqlx::PgPool;

use crate::models::message::{Message, NewMessage, ASSISTANT_ROLE};

const COLUMNS: &str = "\
    id, session_id, role, content, image_key, content_type, external_url, \
    is_edit, generation_ms, model_id, created_at";

pub struct MessageRepo;

impl MessageRepo {
    /// Insert an assistant message. Returns `None` when the id already exists.
    pub async fn insert(pool: &PgPool, input: &NewMessage) -> Result<Option<Message>, sqlx::Error> {
        let query = format!(
            "INSERT INTO messages \
                 (id, session_id, role, content, image_key, content_type, \
                  external_url, is_edit, generation_ms, model_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (id) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Message>(&query)
            .bind(input.id)
            .bind(input.session_id)
            .bind(ASSISTANT_ROLE)
            .bind(&input.content)
            .bind(&input.image_key)
            .bind(&input.content_type)
            .bind(&input.external_url)
            .bind(input.is_edit)
            .bind(input.generation_ms)
            .bind(&input.model_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: JobId) -> Result<Option<Message>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM messages WHERE id = $1");
        sqlx::query_as::<_, Message>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn delete(pool: &PgPool, id: JobId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
