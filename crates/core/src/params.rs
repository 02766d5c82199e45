//! Generation request payloads and their validation.
//!
//! [`GenerationRequest`] is what a caller submits. [`GenerationParams`] is
//! the opaque blob persisted on the job row; by the time it is written every
//! inline reference image has been moved into the binary store, so only
//! URLs and store keys remain.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::SubmitError;
use crate::registry::{ModelDescriptor, ProviderKind};

/// Default output edge length when the caller omits one.
pub const DEFAULT_DIMENSION: u32 = 1024;

/// Default number of diffusion steps.
pub const DEFAULT_STEPS: u32 = 4;

/// Default classifier-free guidance scale.
pub const DEFAULT_GUIDANCE: f32 = 7.5;

// ---------------------------------------------------------------------------
// Reference images
// ---------------------------------------------------------------------------

/// A reference image as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReferenceImageInput {
    /// An image the backend can fetch itself.
    Url { url: String },
    /// Base64 image data, optionally as a `data:` URL.
    Inline {
        data: String,
        #[serde(default)]
        content_type: Option<String>,
    },
    /// An object already present in the binary store.
    Stored { key: String },
}

/// A reference image as persisted on a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReferenceImage {
    Url { url: String },
    Stored { key: String },
}

impl From<ReferenceImage> for ReferenceImageInput {
    fn from(value: ReferenceImage) -> Self {
        match value {
            ReferenceImage::Url { url } => Self::Url { url },
            ReferenceImage::Stored { key } => Self::Stored { key },
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted parameters
// ---------------------------------------------------------------------------

/// Structured parameters stored in the job's `params` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reference_images: Vec<ReferenceImage>,
}

impl GenerationParams {
    /// A job is an edit when it carries at least one reference image.
    pub fn is_edit(&self) -> bool {
        !self.reference_images.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

fn default_dimension() -> u32 {
    DEFAULT_DIMENSION
}

fn default_steps() -> u32 {
    DEFAULT_STEPS
}

fn default_guidance() -> f32 {
    DEFAULT_GUIDANCE
}

/// Body of a generation submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct GenerationRequest {
    #[validate(length(min = 1, max = 4000, message = "prompt must be 1-4000 characters"))]
    pub prompt: String,
    pub model_id: String,
    #[serde(default = "default_dimension")]
    #[validate(range(min = 64, max = 4096, message = "width must be 64-4096"))]
    pub width: u32,
    #[serde(default = "default_dimension")]
    #[validate(range(min = 64, max = 4096, message = "height must be 64-4096"))]
    pub height: u32,
    #[serde(default = "default_steps")]
    #[validate(range(min = 1, max = 100, message = "steps must be 1-100"))]
    pub steps: u32,
    #[serde(default = "default_guidance")]
    #[validate(range(min = 0.0, max = 30.0, message = "guidance must be 0-30"))]
    pub guidance: f32,
    #[serde(default)]
    #[validate(length(max = 2000, message = "negative_prompt must be at most 2000 characters"))]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub reference_images: Vec<ReferenceImageInput>,
}

impl GenerationRequest {
    /// Rebuild a submission from a previous job's persisted fields.
    pub fn from_params(model_id: &str, prompt: &str, params: &GenerationParams) -> Self {
        Self {
            prompt: prompt.to_string(),
            model_id: model_id.to_string(),
            width: params.width,
            height: params.height,
            steps: params.steps,
            guidance: params.guidance,
            negative_prompt: params.negative_prompt.clone(),
            reference_images: params
                .reference_images
                .iter()
                .cloned()
                .map(ReferenceImageInput::from)
                .collect(),
        }
    }

    pub fn is_edit(&self) -> bool {
        !self.reference_images.is_empty()
    }

    /// Check the request against the field rules and the model's capabilities.
    pub fn check_against(&self, model: &ModelDescriptor) -> Result<(), SubmitError> {
        self.validate()
            .map_err(|e| SubmitError::Validation(e.to_string()))?;

        if self.prompt.trim().is_empty() {
            return Err(SubmitError::Validation("prompt must not be blank".into()));
        }

        if self.width > model.max_width || self.height > model.max_height {
            return Err(SubmitError::Validation(format!(
                "Requested size {}x{} exceeds the {}x{} limit of model '{}'",
                self.width, self.height, model.max_width, model.max_height, model.id
            )));
        }

        if !self.is_edit() {
            return Ok(());
        }

        if !model.supports_editing {
            return Err(SubmitError::Validation(format!(
                "Model '{}' does not support image editing",
                model.id
            )));
        }

        if self.reference_images.len() > model.max_reference_images {
            return Err(SubmitError::Validation(format!(
                "Model '{}' accepts at most {} reference images, got {}",
                model.id,
                model.max_reference_images,
                self.reference_images.len()
            )));
        }

        for (index, image) in self.reference_images.iter().enumerate() {
            match image {
                ReferenceImageInput::Url { url } => {
                    if model.provider == ProviderKind::Managed {
                        return Err(SubmitError::Validation(format!(
                            "Model '{}' only accepts uploaded reference images (image {index} is a URL)",
                            model.id
                        )));
                    }
                    if !(url.starts_with("https://") || url.starts_with("http://")) {
                        return Err(SubmitError::Validation(format!(
                            "Reference image {index} must be an http(s) URL"
                        )));
                    }
                }
                ReferenceImageInput::Inline { data, .. } => {
                    if data.trim().is_empty() {
                        return Err(SubmitError::Validation(format!(
                            "Reference image {index} has no data"
                        )));
                    }
                }
                ReferenceImageInput::Stored { key } => {
                    if key.is_empty() || key.split('/').any(|part| part == "..") {
                        return Err(SubmitError::Validation(format!(
                            "Reference image {index} has an invalid storage key"
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}
