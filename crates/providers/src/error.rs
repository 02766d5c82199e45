/// Faults that prevent a provider call from producing any answer at all.
///
/// A backend that answers with an error status is not a fault; adapters
/// turn that into [`crate::GenerateOutcome::Failure`].
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The HTTP request itself failed (connect, TLS, timeout, body read).
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),
}
