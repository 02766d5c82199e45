//! Provider selection.

use std::sync::Arc;

use atelier_core::error::SubmitError;

use crate::adapter::{ComputeHandle, ImageProvider, ProviderContext};

/// Ordered set of registered providers.
///
/// Lookup walks providers in registration order and returns the first one
/// that claims the model, so overlapping registrations resolve the same way
/// on every call.
#[derive(Clone, Default)]
pub struct Dispatcher {
    providers: Vec<Arc<dyn ImageProvider>>,
}

impl Dispatcher {
    pub fn new(providers: Vec<Arc<dyn ImageProvider>>) -> Self {
        Self { providers }
    }

    pub fn register(&mut self, provider: Arc<dyn ImageProvider>) {
        self.providers.push(provider);
    }

    pub fn for_model(&self, model_id: &str) -> Result<Arc<dyn ImageProvider>, SubmitError> {
        self.providers
            .iter()
            .find(|provider| provider.supports(model_id))
            .cloned()
            .ok_or_else(|| SubmitError::NoProvider(model_id.to_string()))
    }

    pub fn context_for(
        &self,
        credential: Option<String>,
        compute: Option<ComputeHandle>,
    ) -> ProviderContext {
        ProviderContext {
            credential,
            compute,
        }
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
