//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument and return raw `sqlx` results.
//! Domain error mapping happens one level up in [`crate::pg`].

pub mod credential_repo;
pub mod job_repo;
pub mod message_repo;
pub mod session_repo;

pub use credential_repo::CredentialRepo;
pub use job_repo::JobRepo;
pub use message_repo::MessageRepo;
pub use session_repo::SessionRepo;
