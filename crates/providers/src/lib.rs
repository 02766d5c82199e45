//! Image generation backends.
//!
//! Each backend family implements [`ImageProvider`]. The [`Dispatcher`]
//! picks the first registered provider that claims a model and builds the
//! per-call [`ProviderContext`].

pub mod adapter;
pub mod dispatcher;
pub mod error;
pub mod managed;
pub mod remote;

pub use adapter::{
    ComputeHandle, GenerateOutcome, GenerateRequest, ImageInput, ImageProvider, ProviderContext,
};
pub use dispatcher::Dispatcher;
pub use error::ProviderError;
pub use managed::ManagedProvider;
pub use remote::RemoteProvider;
