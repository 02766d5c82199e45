//! PostgreSQL implementation of the store traits.

use async_trait::async_trait;
use atelier_core::job::JobStatus;
use atelier_core::registry::ProviderKind;
use atelier_core::types::{DbId, JobId, Timestamp};

use crate::models::job::{Job, NewJob};
use crate::models::message::{Message, NewMessage};
use crate::models::session::Session;
use crate::repositories::{CredentialRepo, JobRepo, MessageRepo, SessionRepo};
use crate::store::{CredentialStore, JobStore, PendingScope, SessionStore, StoreError};
use crate::DbPool;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn create(&self, job: NewJob) -> Result<Job, StoreError> {
        let id = job.id;
        JobRepo::insert(&self.pool, &job)
            .await?
            .ok_or(StoreError::DuplicateJob(id))
    }

    async fn transition(
        &self,
        id: JobId,
        next: JobStatus,
        error_message: Option<&str>,
    ) -> Result<Job, StoreError> {
        if let Some(expected) = next.predecessor() {
            if let Some(job) =
                JobRepo::compare_and_set(&self.pool, id, expected, next, error_message).await?
            {
                return Ok(job);
            }
        }

        // Either the row is gone or someone else moved it first.
        let current = JobRepo::find_by_id(&self.pool, id)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        Err(StoreError::InvalidTransition {
            id,
            from: current.status,
            to: next,
        })
    }

    async fn get(&self, id: JobId) -> Result<Job, StoreError> {
        JobRepo::find_by_id(&self.pool, id)
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    async fn list_pending(&self, scope: PendingScope) -> Result<Vec<Job>, StoreError> {
        let jobs = match scope {
            PendingScope::Session(session_id) => {
                JobRepo::list_open_by_session(&self.pool, session_id).await?
            }
            PendingScope::Owner(owner_id) => {
                JobRepo::list_open_by_owner(&self.pool, owner_id).await?
            }
        };
        Ok(jobs)
    }

    async fn list_stuck(&self, older_than: Timestamp) -> Result<Vec<Job>, StoreError> {
        Ok(JobRepo::list_open_since(&self.pool, older_than).await?)
    }

    async fn purge_terminal_older_than(
        &self,
        age: chrono::Duration,
    ) -> Result<Vec<Job>, StoreError> {
        let cutoff = chrono::Utc::now() - age;
        Ok(JobRepo::delete_terminal_before(&self.pool, cutoff).await?)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(crate::health_check(&self.pool).await?)
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn find_session(&self, id: DbId) -> Result<Option<Session>, StoreError> {
        Ok(SessionRepo::find_by_id(&self.pool, id).await?)
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let id = message.id;
        MessageRepo::insert(&self.pool, &message)
            .await?
            .ok_or(StoreError::DuplicateMessage(id))
    }

    async fn find_message(&self, id: JobId) -> Result<Option<Message>, StoreError> {
        Ok(MessageRepo::find_by_id(&self.pool, id).await?)
    }

    async fn delete_message(&self, id: JobId) -> Result<bool, StoreError> {
        Ok(MessageRepo::delete(&self.pool, id).await?)
    }

    async fn set_current_reference(
        &self,
        session_id: DbId,
        message_id: JobId,
    ) -> Result<(), StoreError> {
        SessionRepo::set_current_reference(&self.pool, session_id, message_id).await?;
        Ok(())
    }

    async fn set_title_if_unset(&self, session_id: DbId, title: &str) -> Result<bool, StoreError> {
        Ok(SessionRepo::set_title_if_unset(&self.pool, session_id, title).await?)
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn credential_for(
        &self,
        owner_id: DbId,
        kind: ProviderKind,
    ) -> Result<Option<String>, StoreError> {
        Ok(CredentialRepo::find_secret(&self.pool, owner_id, kind).await?)
    }
}
