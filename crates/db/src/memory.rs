//! In-process store implementations.
//!
//! These follow the same compare-and-set rules as the PostgreSQL store and
//! back the API test suites and database-less local runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use atelier_core::job::JobStatus;
use atelier_core::registry::ProviderKind;
use atelier_core::types::{DbId, JobId, Timestamp};
use chrono::Utc;
use tokio::sync::RwLock;

use crate::models::job::{Job, NewJob};
use crate::models::message::{Message, NewMessage, ASSISTANT_ROLE};
use crate::models::session::Session;
use crate::store::{CredentialStore, JobStore, PendingScope, SessionStore, StoreError};

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every job regardless of status, oldest first.
    pub async fn all(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        sort_oldest_first(&mut jobs);
        jobs
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Shift a job's timestamps into the past, as if it had been sitting
    /// in its current status for `by`.
    pub async fn age(&self, id: JobId, by: chrono::Duration) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.created_at -= by;
        job.updated_at -= by;
        if let Some(completed_at) = job.completed_at.as_mut() {
            *completed_at -= by;
        }
        Ok(())
    }
}

fn sort_oldest_first(jobs: &mut [Job]) {
    jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, input: NewJob) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&input.id) {
            return Err(StoreError::DuplicateJob(input.id));
        }
        let now = Utc::now();
        let job = Job {
            id: input.id,
            session_id: input.session_id,
            owner_id: input.owner_id,
            status: JobStatus::Pending,
            model_id: input.model_id,
            provider_kind: input.provider_kind,
            prompt: input.prompt,
            params: input.params,
            error_message: None,
            attempt_count: 0,
            retry_of_job_id: input.retry_of_job_id,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn transition(
        &self,
        id: JobId,
        next: JobStatus,
        error_message: Option<&str>,
    ) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if !job.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                id,
                from: job.status,
                to: next,
            });
        }

        let now = Utc::now();
        job.status = next;
        job.error_message = error_message.map(str::to_string);
        job.updated_at = now;
        if next == JobStatus::Processing {
            job.attempt_count += 1;
        }
        if next.is_terminal() {
            job.completed_at = Some(now);
        }
        Ok(job.clone())
    }

    async fn get(&self, id: JobId) -> Result<Job, StoreError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list_pending(&self, scope: PendingScope) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| !job.is_terminal())
            .filter(|job| match scope {
                PendingScope::Session(session_id) => job.session_id == session_id,
                PendingScope::Owner(owner_id) => job.owner_id == owner_id,
            })
            .cloned()
            .collect();
        sort_oldest_first(&mut jobs);
        Ok(jobs)
    }

    async fn list_stuck(&self, older_than: Timestamp) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| !job.is_terminal() && job.updated_at < older_than)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.updated_at);
        Ok(jobs)
    }

    async fn purge_terminal_older_than(
        &self,
        age: chrono::Duration,
    ) -> Result<Vec<Job>, StoreError> {
        let cutoff = Utc::now() - age;
        let mut jobs = self.jobs.write().await;
        let expired: Vec<JobId> = jobs
            .values()
            .filter(|job| matches!(job.completed_at, Some(at) if job.is_terminal() && at < cutoff))
            .map(|job| job.id)
            .collect();
        Ok(expired.iter().filter_map(|id| jobs.remove(id)).collect())
    }
}

// ---------------------------------------------------------------------------
// Sessions and messages
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct MemorySessionStore {
    next_id: AtomicI64,
    sessions: RwLock<HashMap<DbId, Session>>,
    messages: RwLock<HashMap<JobId, Message>>,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            sessions: RwLock::default(),
            messages: RwLock::default(),
        }
    }
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an untitled session owned by `owner_id`.
    pub async fn insert_session(&self, owner_id: DbId) -> Session {
        let now = Utc::now();
        let session = Session {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            owner_id,
            title: None,
            current_reference_id: None,
            created_at: now,
            updated_at: now,
        };
        self.sessions
            .write()
            .await
            .insert(session.id, session.clone());
        session
    }

    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn find_session(&self, id: DbId) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn insert_message(&self, input: NewMessage) -> Result<Message, StoreError> {
        let mut messages = self.messages.write().await;
        if messages.contains_key(&input.id) {
            return Err(StoreError::DuplicateMessage(input.id));
        }
        let message = Message {
            id: input.id,
            session_id: input.session_id,
            role: ASSISTANT_ROLE.to_string(),
            content: input.content,
            image_key: input.image_key,
            content_type: input.content_type,
            external_url: input.external_url,
            is_edit: input.is_edit,
            generation_ms: input.generation_ms,
            model_id: input.model_id,
            created_at: Utc::now(),
        };
        messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn find_message(&self, id: JobId) -> Result<Option<Message>, StoreError> {
        Ok(self.messages.read().await.get(&id).cloned())
    }

    async fn delete_message(&self, id: JobId) -> Result<bool, StoreError> {
        Ok(self.messages.write().await.remove(&id).is_some())
    }

    async fn set_current_reference(
        &self,
        session_id: DbId,
        message_id: JobId,
    ) -> Result<(), StoreError> {
        if let Some(session) = self.sessions.write().await.get_mut(&session_id) {
            session.current_reference_id = Some(message_id);
            session.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_title_if_unset(&self, session_id: DbId, title: &str) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session_id) {
            Some(session) if session.title.is_none() => {
                session.title = Some(title.to_string());
                session.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    secrets: RwLock<HashMap<(DbId, ProviderKind), String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, owner_id: DbId, kind: ProviderKind, secret: &str) {
        self.secrets
            .write()
            .await
            .insert((owner_id, kind), secret.to_string());
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn credential_for(
        &self,
        owner_id: DbId,
        kind: ProviderKind,
    ) -> Result<Option<String>, StoreError> {
        Ok(self.secrets.read().await.get(&(owner_id, kind)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use atelier_core::params::GenerationParams;
    use uuid::Uuid;

    use super::*;

    fn new_job(session_id: DbId, owner_id: DbId) -> NewJob {
        NewJob {
            id: Uuid::now_v7(),
            session_id,
            owner_id,
            model_id: "flux-1-schnell".into(),
            provider_kind: ProviderKind::Managed,
            prompt: "a red fox".into(),
            params: GenerationParams {
                width: 1024,
                height: 1024,
                steps: 4,
                guidance: 7.5,
                negative_prompt: None,
                reference_images: Vec::new(),
            },
            retry_of_job_id: None,
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_ids() {
        let store = MemoryJobStore::new();
        let input = new_job(1, 1);
        let job = store.create(input.clone()).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempt_count, 0);
        assert!(job.completed_at.is_none());

        assert_matches!(
            store.create(input).await,
            Err(StoreError::DuplicateJob(id)) if id == job.id
        );
    }

    #[tokio::test]
    async fn lifecycle_sets_attempts_and_completion() {
        let store = MemoryJobStore::new();
        let job = store.create(new_job(1, 1)).await.unwrap();

        let job = store
            .transition(job.id, JobStatus::Processing, None)
            .await
            .unwrap();
        assert_eq!(job.attempt_count, 1);
        assert!(job.completed_at.is_none());

        let job = store
            .transition(job.id, JobStatus::Failed, Some("HTTP 500"))
            .await
            .unwrap();
        assert_eq!(job.error_message.as_deref(), Some("HTTP 500"));
        assert!(job.completed_at.is_some());
        assert_eq!(job.attempt_count, 1);
    }

    #[tokio::test]
    async fn terminal_jobs_are_never_resurrected() {
        let store = MemoryJobStore::new();
        let job = store.create(new_job(1, 1)).await.unwrap();
        store
            .transition(job.id, JobStatus::Processing, None)
            .await
            .unwrap();
        store
            .transition(job.id, JobStatus::Completed, None)
            .await
            .unwrap();

        for next in [JobStatus::Pending, JobStatus::Processing, JobStatus::Failed] {
            assert_matches!(
                store.transition(job.id, next, None).await,
                Err(StoreError::InvalidTransition { from: JobStatus::Completed, .. })
            );
        }
        assert_eq!(store.get(job.id).await.unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn pending_cannot_skip_processing() {
        let store = MemoryJobStore::new();
        let job = store.create(new_job(1, 1)).await.unwrap();
        assert_matches!(
            store.transition(job.id, JobStatus::Completed, None).await,
            Err(StoreError::InvalidTransition { from: JobStatus::Pending, to: JobStatus::Completed, .. })
        );
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let store = MemoryJobStore::new();
        let id = Uuid::now_v7();
        assert_matches!(store.get(id).await, Err(StoreError::NotFound(_)));
        assert_matches!(
            store.transition(id, JobStatus::Processing, None).await,
            Err(StoreError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn list_pending_is_scoped_and_ordered() {
        let store = MemoryJobStore::new();
        let first = store.create(new_job(1, 10)).await.unwrap();
        let second = store.create(new_job(1, 10)).await.unwrap();
        let other_session = store.create(new_job(2, 10)).await.unwrap();
        let other_owner = store.create(new_job(3, 20)).await.unwrap();

        store
            .transition(second.id, JobStatus::Processing, None)
            .await
            .unwrap();
        store
            .transition(second.id, JobStatus::Completed, None)
            .await
            .unwrap();

        let session: Vec<JobId> = store
            .list_pending(PendingScope::Session(1))
            .await
            .unwrap()
            .into_iter()
            .map(|job| job.id)
            .collect();
        assert_eq!(session, vec![first.id]);

        let owner: Vec<JobId> = store
            .list_pending(PendingScope::Owner(10))
            .await
            .unwrap()
            .into_iter()
            .map(|job| job.id)
            .collect();
        assert_eq!(owner, vec![first.id, other_session.id]);
        assert!(!owner.contains(&other_owner.id));
    }

    #[tokio::test]
    async fn purge_only_removes_old_terminal_jobs() {
        let store = MemoryJobStore::new();
        let old_done = store.create(new_job(1, 1)).await.unwrap();
        let fresh_done = store.create(new_job(1, 1)).await.unwrap();
        let old_open = store.create(new_job(1, 1)).await.unwrap();

        for id in [old_done.id, fresh_done.id] {
            store.transition(id, JobStatus::Processing, None).await.unwrap();
            store.transition(id, JobStatus::Completed, None).await.unwrap();
        }
        store.age(old_done.id, chrono::Duration::days(40)).await.unwrap();
        store.age(old_open.id, chrono::Duration::days(40)).await.unwrap();

        let removed = store
            .purge_terminal_older_than(chrono::Duration::days(30))
            .await
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, old_done.id);
        assert_matches!(store.get(old_done.id).await, Err(StoreError::NotFound(_)));
        assert!(store.get(fresh_done.id).await.is_ok());
        assert!(store.get(old_open.id).await.is_ok());
    }

    #[tokio::test]
    async fn list_stuck_returns_old_open_jobs() {
        let store = MemoryJobStore::new();
        let stuck = store.create(new_job(1, 1)).await.unwrap();
        let pending = store.create(new_job(1, 1)).await.unwrap();
        let fresh = store.create(new_job(1, 1)).await.unwrap();
        let done = store.create(new_job(1, 1)).await.unwrap();
        store.transition(stuck.id, JobStatus::Processing, None).await.unwrap();
        store.transition(done.id, JobStatus::Processing, None).await.unwrap();
        store.transition(done.id, JobStatus::Completed, None).await.unwrap();
        store.age(stuck.id, chrono::Duration::minutes(30)).await.unwrap();
        store.age(pending.id, chrono::Duration::minutes(20)).await.unwrap();
        store.age(done.id, chrono::Duration::minutes(30)).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::minutes(10);
        let found: Vec<_> = store
            .list_stuck(cutoff)
            .await
            .unwrap()
            .into_iter()
            .map(|job| job.id)
            .collect();
        assert_eq!(found, vec![stuck.id, pending.id]);
        assert!(!found.contains(&fresh.id));
    }

    #[tokio::test]
    async fn title_is_only_set_once() {
        let store = MemorySessionStore::new();
        let session = store.insert_session(7).await;

        assert!(store.set_title_if_unset(session.id, "first").await.unwrap());
        assert!(!store.set_title_if_unset(session.id, "second").await.unwrap());
        let session = store.find_session(session.id).await.unwrap().unwrap();
        assert_eq!(session.title.as_deref(), Some("first"));
        assert!(!store.set_title_if_unset(999, "nope").await.unwrap());
    }

    #[tokio::test]
    async fn messages_share_job_ids_and_reject_duplicates() {
        let store = MemorySessionStore::new();
        let session = store.insert_session(7).await;
        let id = Uuid::now_v7();
        let input = NewMessage {
            id,
            session_id: session.id,
            content: "a red fox".into(),
            image_key: format!("images/{}/{id}.png", session.id),
            content_type: "image/png".into(),
            external_url: None,
            is_edit: false,
            generation_ms: 1200,
            model_id: "flux-1-schnell".into(),
        };

        let message = store.insert_message(input.clone()).await.unwrap();
        assert_eq!(message.role, ASSISTANT_ROLE);
        assert_matches!(
            store.insert_message(input).await,
            Err(StoreError::DuplicateMessage(_))
        );

        store.set_current_reference(session.id, id).await.unwrap();
        let session = store.find_session(session.id).await.unwrap().unwrap();
        assert_eq!(session.current_reference_id, Some(id));

        assert!(store.delete_message(id).await.unwrap());
        assert!(!store.delete_message(id).await.unwrap());
    }

    #[tokio::test]
    async fn credentials_are_keyed_by_owner_and_kind() {
        let store = MemoryCredentialStore::new();
        store.set(1, ProviderKind::Remote, "sk-one").await;

        assert_eq!(
            store.credential_for(1, ProviderKind::Remote).await.unwrap().as_deref(),
            Some("sk-one")
        );
        assert!(store.credential_for(2, ProviderKind::Remote).await.unwrap().is_none());
        assert!(store.credential_for(1, ProviderKind::Managed).await.unwrap().is_none());
    }
}
