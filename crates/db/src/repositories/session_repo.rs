//! Repository for the `sessions` table.
//!
//! Session CRUD belongs to the chat service; this crate only reads sessions
//! and updates the two columns generation owns.

use atelier_core::types::{DbId, JobId};
use sqlx::PgPool;

use crate::models::session::Session;

const COLUMNS: &str = "id, owner_id, title, current_reference_id, created_at, updated_at";

pub struct SessionRepo;

impl SessionRepo {
    pub async fn create(pool: &PgPool, owner_id: DbId) -> Result<Session, sqlx::Error> {
        let query = format!("INSERT INTO sessions (owner_id) VALUES ($1) RETURNING {COLUMNS}");
        sqlx::query_as::<_, Session>(&query)
            .bind(owner_id)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Session>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM sessions WHERE id = $1");
        sqlx::query_as::<_, Session>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn set_current_reference(
        pool: &PgPool,
        id: DbId,
        message_id: JobId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE sessions SET current_reference_id = $2 WHERE id = $1")
            .bind(id)
            .bind(message_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns `true` if the session was untitled and now has `title`.
    pub async fn set_title_if_unset(
        pool: &PgPool,
        id: DbId,
        title: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE sessions SET title = $2 WHERE id = $1 AND title IS NULL")
            .bind(id)
            .bind(title)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
