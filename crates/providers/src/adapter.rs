//! The contract every image backend implements.

use std::fmt;

use async_trait::async_trait;
use atelier_core::job::JobFailure;
use atelier_core::registry::{ModelDescriptor, ProviderKind};
use reqwest::multipart::Part;

use crate::error::ProviderError;

/// Longest slice of an upstream error body kept in a failure reason.
const MAX_REASON_BODY_CHARS: usize = 500;

/// A reference image ready for transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageInput {
    /// Raw bytes, already decoded from base64 or read from the binary store.
    Bytes { data: Vec<u8>, content_type: String },
    /// An image the backend can fetch itself.
    Url(String),
}

/// One generation call, fully resolved.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: ModelDescriptor,
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance: f32,
    pub negative_prompt: Option<String>,
    pub reference_images: Vec<ImageInput>,
}

impl GenerateRequest {
    pub fn is_edit(&self) -> bool {
        !self.reference_images.is_empty()
    }
}

/// Binding to a co-located inference capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeHandle {
    pub endpoint: String,
}

impl ComputeHandle {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint: String = endpoint.into();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }
}

/// Per-call inputs a provider needs beyond the request itself.
#[derive(Clone, Default)]
pub struct ProviderContext {
    pub credential: Option<String>,
    pub compute: Option<ComputeHandle>,
}

impl fmt::Debug for ProviderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderContext")
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("compute", &self.compute)
            .finish()
    }
}

/// What a provider produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerateOutcome {
    Success {
        image: Vec<u8>,
        /// Backend-side reference to the result, when it exposes one.
        external_url: Option<String>,
    },
    Failure(JobFailure),
}

impl GenerateOutcome {
    pub fn upstream(reason: impl Into<String>) -> Self {
        Self::Failure(JobFailure::Upstream(reason.into()))
    }
}

#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn supports(&self, model_id: &str) -> bool;

    /// Run one generation.
    ///
    /// Backend error responses come back as [`GenerateOutcome::Failure`];
    /// only transport faults are returned as `Err`.
    async fn generate(
        &self,
        request: &GenerateRequest,
        context: &ProviderContext,
    ) -> Result<GenerateOutcome, ProviderError>;
}

/// Multipart part for an image, falling back to no declared type when
/// `content_type` does not parse as a MIME type.
pub(crate) fn image_part(data: &[u8], file_name: String, content_type: &str) -> Part {
    let part = || Part::bytes(data.to_vec()).file_name(file_name.clone());
    part().mime_str(content_type).unwrap_or_else(|_| part())
}

/// Human-readable reason for a non-success HTTP response.
pub(crate) fn http_failure_reason(status: reqwest::StatusCode, body: &str) -> String {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            let error = value.get("error")?;
            error
                .as_str()
                .or_else(|| error.get("message").and_then(|m| m.as_str()))
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().chars().take(MAX_REASON_BODY_CHARS).collect());

    if message.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {}: {message}", status.as_u16())
    }
}
