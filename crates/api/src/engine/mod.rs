//! Generation job engine.
//!
//! The [`Orchestrator`] validates and persists submissions, then runs each
//! job on a detached task owned by the [`JobSupervisor`]. Polling and
//! recovery reads live in [`recovery`].

pub mod orchestrator;
pub mod recovery;
pub mod supervisor;
pub mod views;

pub use orchestrator::{Orchestrator, Stores};
pub use supervisor::JobSupervisor;
pub use views::{ArtifactView, JobStatusView, ModelView, SubmitReceipt};
