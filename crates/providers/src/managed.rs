//! Managed-compute provider.
//!
//! Talks to a co-located inference service reached through the
//! [`ComputeHandle`] in the call context. Inputs go up as one multipart
//! form; the image comes back either as a raw `image/*` body or as JSON
//! carrying base64.

use std::collections::HashSet;

use async_trait::async_trait;
use atelier_core::codec;
use atelier_core::job::JobFailure;
use atelier_core::registry::{self, ProviderKind};
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::Form;
use serde::Deserialize;

use crate::adapter::{
    http_failure_reason, image_part, GenerateOutcome, GenerateRequest, ImageInput, ImageProvider,
    ProviderContext,
};
use crate::error::ProviderError;

/// Most reference images one request may carry.
pub const MAX_REFERENCE_IMAGES: usize = 4;

/// Size ceiling for each reference image.
pub const MAX_REFERENCE_BYTES: usize = registry::MANAGED_MAX_REFERENCE_BYTES;

#[derive(Debug, Deserialize)]
struct RunResponse {
    #[serde(default)]
    image: Option<String>,
}

pub struct ManagedProvider {
    client: reqwest::Client,
    models: HashSet<String>,
}

impl ManagedProvider {
    pub fn new(client: reqwest::Client, model_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            client,
            models: model_ids.into_iter().collect(),
        }
    }

    /// Build the multipart body, or explain why the inputs cannot be sent.
    fn build_form(request: &GenerateRequest) -> Result<Form, String> {
        if request.reference_images.len() > MAX_REFERENCE_IMAGES {
            return Err(format!(
                "Managed inference accepts at most {MAX_REFERENCE_IMAGES} reference images, got {}",
                request.reference_images.len()
            ));
        }

        let mut form = Form::new()
            .text("prompt", request.prompt.clone())
            .text("width", request.width.to_string())
            .text("height", request.height.to_string())
            .text("steps", request.steps.to_string())
            .text("guidance", request.guidance.to_string());
        if let Some(negative) = &request.negative_prompt {
            form = form.text("negative_prompt", negative.clone());
        }

        for (index, image) in request.reference_images.iter().enumerate() {
            let ImageInput::Bytes { data, content_type } = image else {
                return Err(format!(
                    "Managed inference cannot fetch reference image {index} by URL"
                ));
            };
            if data.len() > MAX_REFERENCE_BYTES {
                return Err(format!(
                    "Reference image {index} is {} bytes, above the {MAX_REFERENCE_BYTES} byte limit",
                    data.len()
                ));
            }
            let field = format!("image_{index}");
            form = form.part(field.clone(), image_part(data, field, content_type));
        }

        Ok(form)
    }
}

#[async_trait]
impl ImageProvider for ManagedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Managed
    }

    fn supports(&self, model_id: &str) -> bool {
        self.models.contains(model_id)
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
        context: &ProviderContext,
    ) -> Result<GenerateOutcome, ProviderError> {
        let Some(compute) = &context.compute else {
            return Ok(GenerateOutcome::upstream(
                "Managed inference is not configured on this server",
            ));
        };
        let form = match Self::build_form(request) {
            Ok(form) => form,
            Err(reason) => return Ok(GenerateOutcome::upstream(reason)),
        };

        let url = format!("{}/models/{}/run", compute.endpoint, request.model.backend_id);
        tracing::debug!(model_id = %request.model.id, %url, "Calling managed inference");
        let response = self.client.post(&url).multipart(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Ok(GenerateOutcome::upstream(http_failure_reason(status, &body)));
        }

        let is_image = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("image/"));
        let body = response.bytes().await?;

        let image = if is_image {
            body.to_vec()
        } else {
            let parsed: RunResponse = match serde_json::from_slice(&body) {
                Ok(parsed) => parsed,
                Err(e) => {
                    return Ok(GenerateOutcome::upstream(format!(
                        "Malformed managed inference response: {e}"
                    )))
                }
            };
            let Some(encoded) = parsed.image.filter(|encoded| !encoded.is_empty()) else {
                return Ok(GenerateOutcome::Failure(JobFailure::NoImageReturned));
            };
            match codec::decode_chunked(&encoded) {
                Ok(bytes) => bytes,
                Err(e) => {
                    return Ok(GenerateOutcome::upstream(format!(
                        "Managed inference returned invalid base64: {e}"
                    )))
                }
            }
        };

        if image.is_empty() {
            return Ok(GenerateOutcome::Failure(JobFailure::NoImageReturned));
        }
        Ok(GenerateOutcome::Success {
            image,
            external_url: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use atelier_core::registry::ModelDescriptor;

    use super::*;

    fn request(references: Vec<ImageInput>) -> GenerateRequest {
        GenerateRequest {
            model: ModelDescriptor::new("m", "M", ProviderKind::Managed, "@cf/m").with_editing(4),
            prompt: "a cat".into(),
            width: 512,
            height: 512,
            steps: 4,
            guidance: 7.5,
            negative_prompt: None,
            reference_images: references,
        }
    }

    fn png(len: usize) -> ImageInput {
        ImageInput::Bytes {
            data: vec![1; len],
            content_type: "image/png".into(),
        }
    }

    #[test]
    fn form_accepts_references_within_limits() {
        assert!(ManagedProvider::build_form(&request(vec![png(10), png(20)])).is_ok());
    }

    #[test]
    fn form_rejects_too_many_references() {
        let err = ManagedProvider::build_form(&request((0..5).map(|_| png(1)).collect()))
            .err()
            .unwrap();
        assert!(err.contains("at most 4"));
    }

    #[test]
    fn form_rejects_oversized_reference() {
        let err = ManagedProvider::build_form(&request(vec![png(MAX_REFERENCE_BYTES + 1)]))
            .err()
            .unwrap();
        assert!(err.contains("byte limit"));
    }

    #[test]
    fn form_rejects_url_reference() {
        let err = ManagedProvider::build_form(&request(vec![ImageInput::Url(
            "https://example.com/a.png".into(),
        )]))
        .err()
        .unwrap();
        assert!(err.contains("by URL"));
    }

    #[test]
    fn supports_only_registered_models() {
        let provider = ManagedProvider::new(reqwest::Client::new(), ["m".to_string()]);
        assert!(provider.supports("m"));
        assert!(!provider.supports("other"));
        assert_eq!(provider.kind(), ProviderKind::Managed);
    }
}
