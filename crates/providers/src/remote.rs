//! Remote credentialed provider.
//!
//! An external HTTP API authenticated with the caller's bearer credential.
//! Raw reference images are uploaded first and the returned URLs are
//! substituted into the generate call. Upload and generate form one unit
//! that is retried together on transport faults and 5xx answers.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use atelier_core::codec;
use atelier_core::job::JobFailure;
use atelier_core::registry::ProviderKind;
use futures::future::try_join_all;
use reqwest::multipart::Form;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::adapter::{
    http_failure_reason, image_part, GenerateOutcome, GenerateRequest, ImageInput, ImageProvider,
    ProviderContext,
};
use crate::error::ProviderError;

/// Total attempts at the upload-then-generate unit.
pub const DEFAULT_ATTEMPTS: u32 = 2;

/// Base delay between attempts; multiplied by the attempt number.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

/// Response header carrying the backend's own reference to the result.
pub const RESULT_URL_HEADER: &str = "x-result-url";

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

#[derive(Debug, Serialize)]
struct ImagesBody<'a> {
    model: &'a str,
    prompt: &'a str,
    width: u32,
    height: u32,
    steps: u32,
    guidance: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    image_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageItem>,
}

#[derive(Debug, Deserialize)]
struct ImageItem {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// Result of one pass over upload-then-generate.
enum Attempt {
    Finished(GenerateOutcome),
    /// A failure the backend may not repeat (5xx).
    Retryable(JobFailure),
}

impl Attempt {
    fn from_status(status: StatusCode, reason: String) -> Self {
        if status.is_server_error() {
            Self::Retryable(JobFailure::Upstream(reason))
        } else {
            Self::Finished(GenerateOutcome::upstream(reason))
        }
    }
}

pub struct RemoteProvider {
    client: reqwest::Client,
    base_url: String,
    models: HashSet<String>,
    attempts: u32,
    backoff: Duration,
}

impl RemoteProvider {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        model_ids: impl IntoIterator<Item = String>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            models: model_ids.into_iter().collect(),
            attempts: DEFAULT_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }

    /// Set the total number of attempts (at least one).
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Upload one raw image and return the URL the backend assigned to it.
    async fn upload(
        &self,
        index: usize,
        data: &[u8],
        content_type: &str,
        credential: &str,
    ) -> Result<Result<String, (StatusCode, String)>, ProviderError> {
        let part = image_part(data, format!("reference_{index}"), content_type);
        let response = self
            .client
            .post(format!("{}/v1/uploads", self.base_url))
            .bearer_auth(credential)
            .multipart(Form::new().part("file", part))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(Err((status, http_failure_reason(status, &body))));
        }
        match response.json::<UploadResponse>().await {
            Ok(uploaded) => Ok(Ok(uploaded.url)),
            Err(e) if e.is_decode() => Ok(Err((
                status,
                format!("Malformed upload response: {e}"),
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace raw images with uploaded URLs, uploading concurrently.
    async fn resolve_references(
        &self,
        request: &GenerateRequest,
        credential: &str,
    ) -> Result<Result<Vec<String>, Attempt>, ProviderError> {
        let uploads = request
            .reference_images
            .iter()
            .enumerate()
            .map(|(index, image)| async move {
                match image {
                    ImageInput::Url(url) => Ok(Ok(url.clone())),
                    ImageInput::Bytes { data, content_type } => {
                        self.upload(index, data, content_type, credential).await
                    }
                }
            });

        let mut urls = Vec::with_capacity(request.reference_images.len());
        for (index, uploaded) in try_join_all(uploads).await?.into_iter().enumerate() {
            match uploaded {
                Ok(url) => urls.push(url),
                Err((status, reason)) => {
                    return Ok(Err(Attempt::from_status(
                        status,
                        format!("Reference image {index} upload failed: {reason}"),
                    )))
                }
            }
        }
        Ok(Ok(urls))
    }

    async fn attempt(
        &self,
        request: &GenerateRequest,
        credential: &str,
    ) -> Result<Attempt, ProviderError> {
        let image_urls = match self.resolve_references(request, credential).await? {
            Ok(urls) => urls,
            Err(attempt) => return Ok(attempt),
        };

        let body = ImagesBody {
            model: &request.model.backend_id,
            prompt: &request.prompt,
            width: request.width,
            height: request.height,
            steps: request.steps,
            guidance: request.guidance,
            negative_prompt: request.negative_prompt.as_deref(),
            image_urls,
        };
        let response = self
            .client
            .post(format!("{}/v1/images", self.base_url))
            .bearer_auth(credential)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Ok(Attempt::from_status(status, http_failure_reason(status, &text)));
        }

        let header_url = response
            .headers()
            .get(RESULT_URL_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let parsed: ImagesResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) if e.is_decode() => {
                return Ok(Attempt::Finished(GenerateOutcome::upstream(format!(
                    "Malformed image response: {e}"
                ))))
            }
            Err(e) => return Err(e.into()),
        };

        let Some(item) = parsed.data.into_iter().next() else {
            return Ok(Attempt::Finished(GenerateOutcome::Failure(
                JobFailure::NoImageReturned,
            )));
        };

        let image = match (item.b64_json.filter(|b64| !b64.is_empty()), &item.url) {
            (Some(encoded), _) => match codec::decode_chunked(&encoded) {
                Ok(bytes) => bytes,
                Err(e) => {
                    return Ok(Attempt::Finished(GenerateOutcome::upstream(format!(
                        "Remote provider returned invalid base64: {e}"
                    ))))
                }
            },
            (None, Some(url)) => {
                // Result URLs point at the backend's CDN; no credential is sent.
                let download = self.client.get(url).send().await?;
                let status = download.status();
                if !status.is_success() {
                    let text = download.text().await.unwrap_or_default();
                    return Ok(Attempt::from_status(
                        status,
                        format!("Result download failed: {}", http_failure_reason(status, &text)),
                    ));
                }
                download.bytes().await?.to_vec()
            }
            (None, None) => Vec::new(),
        };

        if image.is_empty() {
            return Ok(Attempt::Finished(GenerateOutcome::Failure(
                JobFailure::NoImageReturned,
            )));
        }
        Ok(Attempt::Finished(GenerateOutcome::Success {
            image,
            external_url: header_url.or(item.url),
        }))
    }
}

#[async_trait]
impl ImageProvider for RemoteProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Remote
    }

    fn supports(&self, model_id: &str) -> bool {
        self.models.contains(model_id)
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
        context: &ProviderContext,
    ) -> Result<GenerateOutcome, ProviderError> {
        let Some(credential) = context.credential.as_deref() else {
            return Ok(GenerateOutcome::upstream(format!(
                "Model '{}' requires a credential and none was supplied",
                request.model.id
            )));
        };

        let mut attempt = 1;
        loop {
            let last = attempt >= self.attempts;
            match self.attempt(request, credential).await {
                Ok(Attempt::Finished(outcome)) => return Ok(outcome),
                Ok(Attempt::Retryable(failure)) if last => {
                    return Ok(GenerateOutcome::Failure(failure))
                }
                Err(e) if last => return Err(e),
                Ok(Attempt::Retryable(failure)) => {
                    tracing::warn!(
                        model_id = %request.model.id,
                        attempt,
                        reason = %failure,
                        "Remote generation failed, retrying",
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        model_id = %request.model.id,
                        attempt,
                        error = %e,
                        "Remote provider unreachable, retrying",
                    );
                }
            }
            tokio::time::sleep(self.backoff * attempt).await;
            attempt += 1;
        }
    }
}
