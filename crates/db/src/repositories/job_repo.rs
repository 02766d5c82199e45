//! Repository for the `generation_jobs` table.

use atelier_core::job::{JobStatus, StatusId};
use atelier_core::types::{DbId, JobId, Timestamp};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::job::{Job, NewJob};

/// Column list for `generation_jobs` queries.
const COLUMNS: &str = "\
    id, session_id, owner_id, status_id, model_id, provider_kind, prompt, \
    params, error_message, attempt_count, retry_of_job_id, \
    created_at, updated_at, completed_at";

/// Non-terminal statuses: pending, processing.
const OPEN: [StatusId; 2] = [JobStatus::Pending as StatusId, JobStatus::Processing as StatusId];

/// Terminal statuses: completed, failed.
const CLOSED: [StatusId; 2] = [JobStatus::Completed as StatusId, JobStatus::Failed as StatusId];

pub struct JobRepo;

impl JobRepo {
    /// Insert a pending job. Returns `None` when the id already exists.
    pub async fn insert(pool: &PgPool, input: &NewJob) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "INSERT INTO generation_jobs \
                 (id, session_id, owner_id, status_id, model_id, provider_kind, \
                  prompt, params, retry_of_job_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (id) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(input.id)
            .bind(input.session_id)
            .bind(input.owner_id)
            .bind(JobStatus::Pending.id())
            .bind(&input.model_id)
            .bind(input.provider_kind.as_str())
            .bind(&input.prompt)
            .bind(Json(&input.params))
            .bind(input.retry_of_job_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: JobId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM generation_jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Move a job from `expected` to `next` in one statement.
    ///
    /// Returns `None` when the row does not exist or is no longer in
    /// `expected`; the caller tells the two apart with a follow-up read.
    pub async fn compare_and_set(
        pool: &PgPool,
        id: JobId,
        expected: JobStatus,
        next: JobStatus,
        error_message: Option<&str>,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE generation_jobs \
             SET status_id = $2, \
                 error_message = $3, \
                 attempt_count = attempt_count + CASE WHEN $5 THEN 1 ELSE 0 END, \
                 completed_at = CASE WHEN $6 THEN NOW() ELSE completed_at END \
             WHERE id = $1 AND status_id = $4 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(next.id())
            .bind(error_message)
            .bind(expected.id())
            .bind(next == JobStatus::Processing)
            .bind(next.is_terminal())
            .fetch_optional(pool)
            .await
    }

    /// Non-terminal jobs of a session, oldest first.
    pub async fn list_open_by_session(
        pool: &PgPool,
        session_id: DbId,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM generation_jobs \
             WHERE session_id = $1 AND status_id IN ($2, $3) \
             ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(session_id)
            .bind(OPEN[0])
            .bind(OPEN[1])
            .fetch_all(pool)
            .await
    }

    /// Non-terminal jobs across all of an owner's sessions, oldest first.
    pub async fn list_open_by_owner(
        pool: &PgPool,
        owner_id: DbId,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM generation_jobs \
             WHERE owner_id = $1 AND status_id IN ($2, $3) \
             ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(owner_id)
            .bind(OPEN[0])
            .bind(OPEN[1])
            .fetch_all(pool)
            .await
    }

    pub async fn list_open_since(
        pool: &PgPool,
        older_than: Timestamp,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM generation_jobs \
             WHERE status_id IN ($1, $2) AND updated_at < $3 \
             ORDER BY updated_at ASC"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(OPEN[0])
            .bind(OPEN[1])
            .bind(older_than)
            .fetch_all(pool)
            .await
    }

    /// Delete terminal jobs that finished before `cutoff`, returning them.
    pub async fn delete_terminal_before(
        pool: &PgPool,
        cutoff: Timestamp,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "DELETE FROM generation_jobs \
             WHERE status_id IN ($1, $2) AND completed_at < $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(CLOSED[0])
            .bind(CLOSED[1])
            .bind(cutoff)
            .fetch_all(pool)
            .await
    }
}
