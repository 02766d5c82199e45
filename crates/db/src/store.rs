//! Store traits the orchestrator depends on.
//!
//! Every job status write goes through [`JobStore::transition`], which is a
//! compare-and-set against `next.predecessor()`. Concurrent writers (the
//! detached execution task and the stuck-job watchdog) can therefore race
//! freely: exactly one wins and the loser observes
//! [`StoreError::InvalidTransition`].

use async_trait::async_trait;
use atelier_core::job::JobStatus;
use atelier_core::registry::ProviderKind;
use atelier_core::types::{DbId, JobId, Timestamp};

use crate::models::job::{Job, NewJob};
use crate::models::message::{Message, NewMessage};
use crate::models::session::Session;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job {0} not found")]
    NotFound(JobId),

    #[error("Job {0} already exists")]
    DuplicateJob(JobId),

    #[error("Message {0} already exists")]
    DuplicateMessage(JobId),

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Which non-terminal jobs to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingScope {
    Session(DbId),
    Owner(DbId),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new `pending` job. Fails with [`StoreError::DuplicateJob`]
    /// when the id is taken.
    async fn create(&self, job: NewJob) -> Result<Job, StoreError>;

    /// Atomically move a job to `next`.
    ///
    /// Applies only while the job is in `next.predecessor()`. Entering
    /// `processing` increments `attempt_count`; entering a terminal status
    /// sets `completed_at`. `error_message` is written as given.
    async fn transition(
        &self,
        id: JobId,
        next: JobStatus,
        error_message: Option<&str>,
    ) -> Result<Job, StoreError>;

    async fn get(&self, id: JobId) -> Result<Job, StoreError>;

    /// Non-terminal jobs in scope, oldest first (ties broken by id).
    async fn list_pending(&self, scope: PendingScope) -> Result<Vec<Job>, StoreError>;

    /// Open jobs (`pending` or `processing`) whose last update is before
    /// `older_than`, least recently updated first.
    async fn list_stuck(&self, older_than: Timestamp) -> Result<Vec<Job>, StoreError>;

    /// Delete terminal jobs whose `completed_at` is older than `age` and
    /// return the removed rows, so their stored objects can be released.
    async fn purge_terminal_older_than(&self, age: chrono::Duration)
        -> Result<Vec<Job>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn find_session(&self, id: DbId) -> Result<Option<Session>, StoreError>;

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    async fn find_message(&self, id: JobId) -> Result<Option<Message>, StoreError>;

    /// Returns `true` when a row was removed.
    async fn delete_message(&self, id: JobId) -> Result<bool, StoreError>;

    async fn set_current_reference(
        &self,
        session_id: DbId,
        message_id: JobId,
    ) -> Result<(), StoreError>;

    /// Set the title only if the session has none yet. Returns `true` when
    /// the title was written.
    async fn set_title_if_unset(&self, session_id: DbId, title: &str)
        -> Result<bool, StoreError>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn credential_for(
        &self,
        owner_id: DbId,
        kind: ProviderKind,
    ) -> Result<Option<String>, StoreError>;
}
