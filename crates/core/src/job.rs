//! Generation job lifecycle.
//!
//! A job moves strictly forward through
//! `pending -> processing -> {completed | failed}`. The transition rule is
//! encoded once here ([`JobStatus::predecessor`]) and every store enforces
//! it as a compare-and-set: a write to `next` only applies while the row is
//! still in `next.predecessor()`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Status ID type matching the SMALLINT `job_statuses` lookup table.
pub type StatusId = i16;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Generation job status. Discriminants match the `job_statuses` seed rows.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending = 1,
    Processing = 2,
    Completed = 3,
    Failed = 4,
}

/// Statuses a job can be observed in while its execution is outstanding.
pub const NON_TERMINAL_STATUSES: [JobStatus; 2] = [JobStatus::Pending, JobStatus::Processing];

/// Statuses no job ever leaves.
pub const TERMINAL_STATUSES: [JobStatus; 2] = [JobStatus::Completed, JobStatus::Failed];

impl JobStatus {
    /// Return the database status ID.
    pub fn id(self) -> StatusId {
        self as StatusId
    }

    /// Map a database status ID back to the enum.
    pub fn from_id(id: StatusId) -> Option<Self> {
        match id {
            1 => Some(Self::Pending),
            2 => Some(Self::Processing),
            3 => Some(Self::Completed),
            4 => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The only status a job may be in immediately before entering `self`.
    ///
    /// `Pending` has no predecessor: it is only ever written on insert.
    pub fn predecessor(self) -> Option<Self> {
        match self {
            Self::Pending => None,
            Self::Processing => Some(Self::Pending),
            Self::Completed | Self::Failed => Some(Self::Processing),
        }
    }

    /// Whether a job currently in `self` may move to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        next.predecessor() == Some(self)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<StatusId> for JobStatus {
    type Error = CoreError;

    fn try_from(value: StatusId) -> Result<Self, Self::Error> {
        Self::from_id(value)
            .ok_or_else(|| CoreError::Internal(format!("Unknown job status id {value}")))
    }
}

impl From<JobStatus> for StatusId {
    fn from(value: JobStatus) -> Self {
        value as StatusId
    }
}

// ---------------------------------------------------------------------------
// Failure reasons
// ---------------------------------------------------------------------------

/// Why an accepted job ended in `failed`.
///
/// The `Display` output is what gets persisted to `error_message` and shown
/// to the caller through the polling endpoints.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobFailure {
    /// The backend answered with a non-success response or an unusable body.
    /// The reason is stored verbatim.
    #[error("{0}")]
    Upstream(String),

    /// The backend reported success but produced no image payload.
    #[error("Provider returned no image")]
    NoImageReturned,

    /// Writing the generated image or its message row failed. The generated
    /// bytes are discarded.
    #[error("Storage failure: {0}")]
    Storage(String),

    /// The provider could not be reached at all.
    #[error("Provider unreachable: {0}")]
    Transport(String),

    /// Force-failed by the watchdog after sitting in `processing` too long.
    #[error("Generation timed out after {0} seconds")]
    TimedOut(u64),
}
