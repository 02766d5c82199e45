//! Polling and recovery reads.
//!
//! Clients that lose track of a job (page reload, dropped connection) call
//! [`Orchestrator::list_outstanding`] once to find what is still running
//! and then poll [`Orchestrator::get_status`] per job. Every read is a
//! fresh store query, so repeated polls of a settled job return the same
//! answer.

use atelier_core::error::CoreError;
use atelier_core::job::JobStatus;
use atelier_core::params::GenerationRequest;
use atelier_core::storage::StoredObject;
use atelier_core::types::{DbId, JobId};
use atelier_db::models::job::Job;
use atelier_db::PendingScope;

use crate::engine::orchestrator::Orchestrator;
use crate::engine::views::{ArtifactView, JobStatusView, ModelView, SubmitReceipt};
use crate::error::AppResult;

impl Orchestrator {
    /// Load a job the caller owns.
    async fn owned_job(&self, caller: DbId, id: JobId) -> AppResult<Job> {
        let job = self.stores.jobs.get(id).await?;
        if job.owner_id != caller {
            return Err(CoreError::Forbidden("Job belongs to another account".into()).into());
        }
        Ok(job)
    }

    /// A job plus its artifact once it completed.
    pub async fn get_status(&self, caller: DbId, id: JobId) -> AppResult<JobStatusView> {
        let job = self.owned_job(caller, id).await?;
        let artifact = if job.status == JobStatus::Completed {
            self.stores
                .sessions
                .find_message(job.id)
                .await?
                .map(|message| ArtifactView::from_message(&message))
        } else {
            None
        };
        Ok(JobStatusView { job, artifact })
    }

    /// Non-terminal jobs of one session, oldest first.
    pub async fn list_outstanding(&self, caller: DbId, session_id: DbId) -> AppResult<Vec<Job>> {
        self.authorize_session(caller, session_id).await?;
        Ok(self
            .stores
            .jobs
            .list_pending(PendingScope::Session(session_id))
            .await?)
    }

    /// Non-terminal jobs across every session of the caller, oldest first.
    pub async fn list_outstanding_for_owner(&self, caller: DbId) -> AppResult<Vec<Job>> {
        Ok(self
            .stores
            .jobs
            .list_pending(PendingScope::Owner(caller))
            .await?)
    }

    /// Image bytes of a completed job's artifact.
    pub async fn artifact_image(&self, caller: DbId, id: JobId) -> AppResult<StoredObject> {
        let job = self.owned_job(caller, id).await?;
        let not_found = || CoreError::NotFound {
            entity: "Artifact",
            id: id.to_string(),
        };
        if job.status != JobStatus::Completed {
            return Err(not_found().into());
        }

        let message = self
            .stores
            .sessions
            .find_message(id)
            .await?
            .ok_or_else(not_found)?;
        let object = self
            .stores
            .binaries
            .get(&message.image_key)
            .await?
            .ok_or_else(not_found)?;
        Ok(object)
    }

    /// Submit a failed job's parameters again as a new job.
    ///
    /// The failed record is left as it is; the new one points back at it
    /// through `retry_of_job_id`.
    pub async fn retry(&self, caller: DbId, id: JobId) -> AppResult<SubmitReceipt> {
        let job = self.owned_job(caller, id).await?;
        if job.status != JobStatus::Failed {
            return Err(CoreError::Conflict(format!(
                "Only failed jobs can be retried; job {id} is {}",
                job.status
            ))
            .into());
        }

        let request = GenerationRequest::from_params(&job.model_id, &job.prompt, &job.params);
        self.submit_job(caller, job.session_id, request, Some(job.id))
            .await
    }

    /// The model catalog in registration order.
    pub fn list_models(&self) -> Vec<ModelView> {
        self.registry
            .list()
            .map(|model| ModelView {
                model: model.clone(),
                available: self.dispatcher.for_model(&model.id).is_ok(),
            })
            .collect()
    }
}
