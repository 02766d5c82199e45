//! Static model catalog.
//!
//! The registry is the single source of truth for which models exist and
//! what they can do. It is built once at startup and shared read-only; the
//! submit path consults it before any adapter is touched so that bad
//! requests fail with a descriptive error instead of an opaque backend one.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, SubmitError};

/// Per-image ceiling of the managed inference service.
pub const MANAGED_MAX_REFERENCE_BYTES: usize = 1024 * 1024;

/// Per-image ceiling applied to remote uploads.
pub const REMOTE_MAX_REFERENCE_BYTES: usize = 4 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Provider kind
// ---------------------------------------------------------------------------

/// Backend family that executes a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Co-located inference capability, reached through a compute binding.
    Managed,
    /// External HTTP API authenticated with a per-account bearer credential.
    Remote,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Managed => "managed",
            Self::Remote => "remote",
        }
    }

    /// Whether models of this kind need a caller-supplied credential.
    pub fn requires_credential(self) -> bool {
        matches!(self, Self::Remote)
    }

    /// Default size ceiling for each decoded reference image.
    pub fn max_reference_bytes(self) -> usize {
        match self {
            Self::Managed => MANAGED_MAX_REFERENCE_BYTES,
            Self::Remote => REMOTE_MAX_REFERENCE_BYTES,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "managed" => Ok(Self::Managed),
            "remote" => Ok(Self::Remote),
            other => Err(CoreError::Validation(format!(
                "Unknown provider kind '{other}'. Must be one of: managed, remote"
            ))),
        }
    }
}

impl TryFrom<String> for ProviderKind {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Immutable catalog entry for one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelDescriptor {
    /// Public identifier used by callers (`model_id` in requests).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    pub provider: ProviderKind,
    /// Identifier the backend itself uses for this model.
    pub backend_id: String,
    pub supports_editing: bool,
    pub max_width: u32,
    pub max_height: u32,
    /// Upper bound on reference images for an edit request.
    pub max_reference_images: usize,
    /// Upper bound on each decoded reference image, in bytes.
    pub max_reference_bytes: usize,
    pub requires_credential: bool,
}

impl ModelDescriptor {
    /// Build a descriptor whose credential requirement follows its provider kind.
    pub fn new(id: &str, name: &str, provider: ProviderKind, backend_id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            provider,
            backend_id: backend_id.to_string(),
            supports_editing: false,
            max_width: 1024,
            max_height: 1024,
            max_reference_images: 0,
            max_reference_bytes: provider.max_reference_bytes(),
            requires_credential: provider.requires_credential(),
        }
    }

    /// Enable editing with up to `max_reference_images` inputs.
    pub fn with_editing(mut self, max_reference_images: usize) -> Self {
        self.supports_editing = true;
        self.max_reference_images = max_reference_images;
        self
    }

    pub fn with_reference_limit(mut self, max_reference_bytes: usize) -> Self {
        self.max_reference_bytes = max_reference_bytes;
        self
    }

    pub fn with_max_size(mut self, max_width: u32, max_height: u32) -> Self {
        self.max_width = max_width;
        self.max_height = max_height;
        self
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Read-only lookup from model identifier to [`ModelDescriptor`].
///
/// Iteration order is registration order.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelDescriptor>,
}

impl ModelRegistry {
    pub fn new(models: impl IntoIterator<Item = ModelDescriptor>) -> Self {
        Self {
            models: models
                .into_iter()
                .map(|model| (model.id.clone(), model))
                .collect(),
        }
    }

    /// The catalog shipped with the service.
    pub fn builtin() -> Self {
        Self::new(default_models())
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelDescriptor> {
        self.models.get(model_id)
    }

    /// Resolve a model or fail with [`SubmitError::UnknownModel`].
    pub fn resolve(&self, model_id: &str) -> Result<&ModelDescriptor, SubmitError> {
        self.get(model_id)
            .ok_or_else(|| SubmitError::UnknownModel(model_id.to_string()))
    }

    pub fn requires_credential(&self, model_id: &str) -> Result<bool, SubmitError> {
        Ok(self.resolve(model_id)?.requires_credential)
    }

    pub fn provider_kind(&self, model_id: &str) -> Result<ProviderKind, SubmitError> {
        Ok(self.resolve(model_id)?.provider)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.values()
    }

    /// Largest total of decoded reference bytes any edit request may carry.
    pub fn largest_reference_payload(&self) -> usize {
        self.models
            .values()
            .filter(|model| model.supports_editing)
            .map(|model| model.max_reference_images * model.max_reference_bytes)
            .max()
            .unwrap_or(0)
    }

    /// Identifiers of every model served by `kind`, in registration order.
    pub fn ids_for(&self, kind: ProviderKind) -> Vec<String> {
        self.models
            .values()
            .filter(|model| model.provider == kind)
            .map(|model| model.id.clone())
            .collect()
    }
}

fn default_models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new(
            "flux-1-schnell",
            "FLUX.1 [schnell]",
            ProviderKind::Managed,
            "@cf/black-forest-labs/flux-1-schnell",
        ),
        ModelDescriptor::new(
            "flux-2-dev",
            "FLUX.2 [dev]",
            ProviderKind::Managed,
            "@cf/black-forest-labs/flux-2-dev",
        )
        .with_editing(4),
        ModelDescriptor::new(
            "sdxl-lightning",
            "Stable Diffusion XL Lightning",
            ProviderKind::Managed,
            "@cf/bytedance/stable-diffusion-xl-lightning",
        ),
        ModelDescriptor::new(
            "flux-pro-ultra",
            "FLUX 1.1 [pro] Ultra",
            ProviderKind::Remote,
            "flux-pro/v1.1-ultra",
        )
        .with_max_size(2048, 2048),
        ModelDescriptor::new(
            "seededit-3",
            "SeedEdit 3.0",
            ProviderKind::Remote,
            "seededit-3.0-i2i",
        )
        .with_editing(4)
        .with_max_size(4096, 4096),
    ]
}
