//! Submission and detached execution of generation jobs.
//!
//! A submission is validated in full (model, provider, request fields,
//! credential) before anything is written. Once the job row exists the
//! caller gets a receipt and execution continues on a supervised task:
//!
//! 1. `pending -> processing`
//! 2. resolve reference images and call the provider
//! 3. store the image and insert the message
//! 4. `processing -> completed` (or `-> failed` with the reason)
//! 5. point the session at the new image and, if untitled, title it
//!
//! Every status write is a compare-and-set, so a job the watchdog already
//! failed is never completed by a late execution.

use std::sync::Arc;
use std::time::Instant;

use atelier_core::codec;
use atelier_core::error::{CoreError, SubmitError};
use atelier_core::job::{JobFailure, JobStatus};
use atelier_core::params::{GenerationParams, GenerationRequest, ReferenceImage, ReferenceImageInput};
use atelier_core::registry::{ModelDescriptor, ModelRegistry};
use atelier_core::storage::{self, BinaryStore};
use atelier_core::title;
use atelier_core::types::{DbId, JobId};
use atelier_db::models::job::{Job, NewJob};
use atelier_db::models::message::{Message, NewMessage};
use atelier_db::models::session::Session;
use atelier_db::pg::PgStore;
use atelier_db::{CredentialStore, JobStore, SessionStore};
use atelier_providers::{
    ComputeHandle, Dispatcher, GenerateOutcome, GenerateRequest, ImageInput, ImageProvider,
    ProviderContext,
};
use uuid::Uuid;

use crate::engine::supervisor::JobSupervisor;
use crate::engine::views::{ArtifactView, SubmitReceipt};
use crate::error::AppResult;

/// Persistence collaborators of the orchestrator.
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub binaries: Arc<dyn BinaryStore>,
}

impl Stores {
    /// All relational stores backed by one PostgreSQL pool.
    pub fn postgres(store: PgStore, binaries: Arc<dyn BinaryStore>) -> Self {
        let store = Arc::new(store);
        Self {
            jobs: store.clone(),
            sessions: store.clone(),
            credentials: store,
            binaries,
        }
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) registry: Arc<ModelRegistry>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) stores: Stores,
    supervisor: JobSupervisor,
    compute: Option<ComputeHandle>,
}

impl Orchestrator {
    pub fn new(registry: ModelRegistry, dispatcher: Dispatcher, stores: Stores) -> Self {
        Self {
            registry: Arc::new(registry),
            dispatcher: Arc::new(dispatcher),
            stores,
            supervisor: JobSupervisor::new(),
            compute: None,
        }
    }

    /// Bind managed-compute providers to a co-located inference endpoint.
    pub fn with_compute(mut self, compute: Option<ComputeHandle>) -> Self {
        self.compute = compute;
        self
    }

    pub fn supervisor(&self) -> &JobSupervisor {
        &self.supervisor
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.stores.jobs
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Validate and persist a generation request, then run it detached.
    pub async fn submit(
        &self,
        caller: DbId,
        session_id: DbId,
        request: GenerationRequest,
    ) -> AppResult<SubmitReceipt> {
        self.submit_job(caller, session_id, request, None).await
    }

    pub(crate) async fn submit_job(
        &self,
        caller: DbId,
        session_id: DbId,
        request: GenerationRequest,
        retry_of: Option<JobId>,
    ) -> AppResult<SubmitReceipt> {
        self.authorize_session(caller, session_id).await?;

        let model = self.registry.resolve(&request.model_id)?.clone();
        let provider = self.dispatcher.for_model(&model.id)?;
        request.check_against(&model)?;

        let credential = if model.requires_credential {
            let secret = self
                .stores
                .credentials
                .credential_for(caller, model.provider)
                .await?;
            Some(secret.ok_or_else(|| SubmitError::MissingCredential {
                model_id: model.id.clone(),
                provider: model.provider,
            })?)
        } else {
            None
        };

        let job_id = Uuid::now_v7();
        let staged = self
            .stage_references(caller, session_id, job_id, &model, &request.reference_images)
            .await?;

        let new_job = NewJob {
            id: job_id,
            session_id,
            owner_id: caller,
            model_id: model.id.clone(),
            provider_kind: model.provider,
            prompt: request.prompt.clone(),
            params: GenerationParams {
                width: request.width,
                height: request.height,
                steps: request.steps,
                guidance: request.guidance,
                negative_prompt: request.negative_prompt.clone(),
                reference_images: staged.clone(),
            },
            retry_of_job_id: retry_of,
        };

        let job = match self.stores.jobs.create(new_job).await {
            Ok(job) => job,
            Err(e) => {
                self.discard_staged(job_id, &staged).await;
                return Err(e.into());
            }
        };

        tracing::info!(
            job_id = %job.id,
            session_id,
            user_id = caller,
            model_id = %job.model_id,
            provider = %job.provider_kind,
            is_edit = job.params.is_edit(),
            retry_of = ?retry_of,
            "Generation job submitted",
        );

        let placeholder_artifact = ArtifactView::placeholder(&job);
        let context = self
            .dispatcher
            .context_for(credential, self.compute.clone());
        let this = self.clone();
        let task_job = job.clone();
        self.supervisor.spawn(job.id, async move {
            this.execute(task_job, provider, context).await;
        });

        Ok(SubmitReceipt {
            job,
            placeholder_artifact,
        })
    }

    /// Resolve a session and check the caller owns it.
    pub(crate) async fn authorize_session(
        &self,
        caller: DbId,
        session_id: DbId,
    ) -> AppResult<Session> {
        let session = self
            .stores
            .sessions
            .find_session(session_id)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                entity: "Session",
                id: session_id.to_string(),
            })?;
        if session.owner_id != caller {
            return Err(CoreError::Forbidden("Session belongs to another account".into()).into());
        }
        Ok(session)
    }

    /// Move inline reference images into the binary store and check that
    /// stored ones are visible to the caller. Nothing staged survives an
    /// error.
    ///
    /// Every staged object lives under the job's own `references/` prefix,
    /// so purging the job can release them without checking other jobs.
    async fn stage_references(
        &self,
        caller: DbId,
        session_id: DbId,
        job_id: JobId,
        model: &ModelDescriptor,
        inputs: &[ReferenceImageInput],
    ) -> AppResult<Vec<ReferenceImage>> {
        let mut staged = Vec::with_capacity(inputs.len());
        for (index, input) in inputs.iter().enumerate() {
            match self
                .stage_reference(caller, session_id, job_id, model, index, input)
                .await
            {
                Ok(image) => staged.push(image),
                Err(e) => {
                    self.discard_staged(job_id, &staged).await;
                    return Err(e);
                }
            }
        }
        Ok(staged)
    }

    async fn stage_reference(
        &self,
        caller: DbId,
        session_id: DbId,
        job_id: JobId,
        model: &ModelDescriptor,
        index: usize,
        input: &ReferenceImageInput,
    ) -> AppResult<ReferenceImage> {
        match input {
            ReferenceImageInput::Url { url } => Ok(ReferenceImage::Url { url: url.clone() }),
            ReferenceImageInput::Stored { key } => {
                self.authorize_stored_key(caller, session_id, index, key)
                    .await?;
                if !key.starts_with("references/") {
                    return Ok(ReferenceImage::Stored { key: key.clone() });
                }

                // Another job's staged reference: copy it so this job owns it.
                let object = self.stores.binaries.get(key).await?.ok_or_else(|| {
                    SubmitError::Validation(format!("Reference image {index} no longer exists"))
                })?;
                check_reference_size(model, index, object.bytes.len())?;
                let own = format!("{}{index}", reference_prefix(job_id));
                self.stores
                    .binaries
                    .put(&own, &object.bytes, &object.content_type)
                    .await?;
                Ok(ReferenceImage::Stored { key: own })
            }
            ReferenceImageInput::Inline { data, content_type } => {
                let bytes = codec::decode_chunked(data).map_err(|e| {
                    SubmitError::Validation(format!(
                        "Reference image {index} is not valid base64: {e}"
                    ))
                })?;
                if bytes.is_empty() {
                    return Err(SubmitError::Validation(format!(
                        "Reference image {index} has no data"
                    ))
                    .into());
                }
                check_reference_size(model, index, bytes.len())?;

                let declared = content_type
                    .as_deref()
                    .or_else(|| codec::split_data_url(data).0);
                let content_type = match (storage::sniff_content_type(&bytes), declared) {
                    (storage::FALLBACK_CONTENT_TYPE, Some(declared)) => declared,
                    (sniffed, _) => sniffed,
                };

                let key = format!("{}{index}", reference_prefix(job_id));
                self.stores
                    .binaries
                    .put(&key, &bytes, content_type)
                    .await?;
                Ok(ReferenceImage::Stored { key })
            }
        }
    }

    /// Delete the reference objects written for `job_id`.
    async fn discard_staged(&self, job_id: JobId, images: &[ReferenceImage]) {
        let prefix = reference_prefix(job_id);
        for image in images {
            if let ReferenceImage::Stored { key } = image {
                if key.starts_with(&prefix) {
                    self.discard_object(job_id, key).await;
                }
            }
        }
    }

    /// Stored references must be a generated image of this session or a
    /// reference staged for one of the caller's own jobs.
    async fn authorize_stored_key(
        &self,
        caller: DbId,
        session_id: DbId,
        index: usize,
        key: &str,
    ) -> AppResult<()> {
        if key.starts_with(&format!("images/{session_id}/")) {
            return Ok(());
        }

        let owner_job = key
            .strip_prefix("references/")
            .and_then(|rest| rest.split('/').next())
            .and_then(|id| Uuid::parse_str(id).ok());
        if let Some(job_id) = owner_job {
            if let Ok(job) = self.stores.jobs.get(job_id).await {
                if job.owner_id == caller {
                    return Ok(());
                }
            }
        }

        Err(SubmitError::Validation(format!(
            "Reference image {index} refers to an object this session cannot use"
        ))
        .into())
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    async fn execute(
        self,
        job: Job,
        provider: Arc<dyn ImageProvider>,
        context: ProviderContext,
    ) {
        let job = match self
            .stores
            .jobs
            .transition(job.id, JobStatus::Processing, None)
            .await
        {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Generation job could not start");
                return;
            }
        };
        tracing::info!(
            job_id = %job.id,
            attempt = job.attempt_count,
            provider = %provider.kind(),
            "Generation started",
        );

        match self.generate(&job, provider.as_ref(), &context).await {
            Ok(message) => self.complete(&job, message).await,
            Err(failure) => self.fail(&job, failure).await,
        }
    }

    /// Call the provider and persist its image as a message.
    async fn generate(
        &self,
        job: &Job,
        provider: &dyn ImageProvider,
        context: &ProviderContext,
    ) -> Result<Message, JobFailure> {
        let model = self
            .registry
            .resolve(&job.model_id)
            .map_err(|e| JobFailure::Upstream(e.to_string()))?
            .clone();

        let request = GenerateRequest {
            model,
            prompt: job.prompt.clone(),
            width: job.params.width,
            height: job.params.height,
            steps: job.params.steps,
            guidance: job.params.guidance,
            negative_prompt: job.params.negative_prompt.clone(),
            reference_images: self.load_references(&job.params).await?,
        };

        let started = Instant::now();
        let outcome = provider
            .generate(&request, context)
            .await
            .map_err(|e| JobFailure::Transport(e.to_string()))?;
        let elapsed = started.elapsed();

        let (image, external_url) = match outcome {
            GenerateOutcome::Success {
                image,
                external_url,
            } => (image, external_url),
            GenerateOutcome::Failure(failure) => return Err(failure),
        };
        if image.is_empty() {
            return Err(JobFailure::NoImageReturned);
        }

        let content_type = storage::sniff_content_type(&image);
        let key = format!(
            "images/{}/{}.{}",
            job.session_id,
            job.id,
            storage::extension_for(content_type)
        );
        self.stores
            .binaries
            .put(&key, &image, content_type)
            .await
            .map_err(|e| JobFailure::Storage(e.to_string()))?;

        let inserted = self
            .stores
            .sessions
            .insert_message(NewMessage {
                id: job.id,
                session_id: job.session_id,
                content: job.prompt.clone(),
                image_key: key.clone(),
                content_type: content_type.to_string(),
                external_url,
                is_edit: job.params.is_edit(),
                generation_ms: i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX),
                model_id: job.model_id.clone(),
            })
            .await;

        match inserted {
            Ok(message) => Ok(message),
            Err(e) => {
                self.discard_object(job.id, &key).await;
                Err(JobFailure::Storage(e.to_string()))
            }
        }
    }

    async fn load_references(&self, params: &GenerationParams) -> Result<Vec<ImageInput>, JobFailure> {
        let mut inputs = Vec::with_capacity(params.reference_images.len());
        for (index, image) in params.reference_images.iter().enumerate() {
            let input = match image {
                ReferenceImage::Url { url } => ImageInput::Url(url.clone()),
                ReferenceImage::Stored { key } => {
                    let object = self
                        .stores
                        .binaries
                        .get(key)
                        .await
                        .map_err(|e| JobFailure::Storage(e.to_string()))?
                        .ok_or_else(|| {
                            JobFailure::Storage(format!("Reference image {index} is missing"))
                        })?;
                    ImageInput::Bytes {
                        data: object.bytes,
                        content_type: object.content_type,
                    }
                }
            };
            inputs.push(input);
        }
        Ok(inputs)
    }

    async fn complete(&self, job: &Job, message: Message) {
        match self
            .stores
            .jobs
            .transition(job.id, JobStatus::Completed, None)
            .await
        {
            Ok(_) => {
                tracing::info!(
                    job_id = %job.id,
                    generation_ms = message.generation_ms,
                    content_type = %message.content_type,
                    "Generation completed",
                );
            }
            Err(e) => {
                // Another writer settled the job first; its outcome stands.
                tracing::warn!(job_id = %job.id, error = %e, "Discarding generated image");
                if let Err(e) = self.stores.sessions.delete_message(message.id).await {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to delete orphaned message");
                }
                self.discard_object(job.id, &message.image_key).await;
                return;
            }
        }

        if let Err(e) = self
            .stores
            .sessions
            .set_current_reference(job.session_id, message.id)
            .await
        {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to update session reference");
        }

        self.auto_title(job).await;
    }

    async fn fail(&self, job: &Job, failure: JobFailure) {
        let reason = failure.to_string();
        match self
            .stores
            .jobs
            .transition(job.id, JobStatus::Failed, Some(&reason))
            .await
        {
            Ok(_) => tracing::warn!(job_id = %job.id, reason = %reason, "Generation failed"),
            Err(e) => tracing::warn!(
                job_id = %job.id,
                reason = %reason,
                error = %e,
                "Failed to record generation failure",
            ),
        }
    }

    /// Title an untitled session after its first completed generation.
    async fn auto_title(&self, job: &Job) {
        let Some(title) = title::title_from_prompt(&job.prompt) else {
            return;
        };
        match self
            .stores
            .sessions
            .set_title_if_unset(job.session_id, &title)
            .await
        {
            Ok(true) => tracing::debug!(session_id = job.session_id, %title, "Session titled"),
            Ok(false) => {}
            Err(e) => tracing::warn!(
                session_id = job.session_id,
                error = %e,
                "Session auto-title failed",
            ),
        }
    }

    async fn discard_object(&self, job_id: JobId, key: &str) {
        if let Err(e) = self.stores.binaries.delete(key).await {
            tracing::warn!(job_id = %job_id, key, error = %e, "Failed to delete stored object");
        }
    }
}

/// Object-key prefix holding the reference images staged for `job_id`.
pub(crate) fn reference_prefix(job_id: JobId) -> String {
    format!("references/{job_id}/")
}

fn check_reference_size(
    model: &ModelDescriptor,
    index: usize,
    len: usize,
) -> Result<(), SubmitError> {
    if len > model.max_reference_bytes {
        return Err(SubmitError::Validation(format!(
            "Reference image {index} is {len} bytes; model '{}' accepts at most {} bytes per image",
            model.id, model.max_reference_bytes
        )));
    }
    Ok(())
}
