//! Watchdog for jobs stuck in `pending` or `processing`.
//!
//! Execution has no mandatory timeout and a crashed process leaves its jobs
//! open. This loop fails any open job whose last update is older than
//! the configured timeout. It writes through the same compare-and-set
//! transition as execution, so whichever of the two lands first wins.

use std::sync::Arc;
use std::time::Duration;

use atelier_core::job::{JobFailure, JobStatus};
use atelier_db::{JobStore, StoreError};
use chrono::Utc;
use tokio_util::sync::CancellationToken;

/// Longest pause between sweeps.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Run the watchdog until `cancel` is triggered.
pub async fn run(jobs: Arc<dyn JobStore>, timeout: Duration, cancel: CancellationToken) {
    let every = sweep_interval(timeout);
    tracing::info!(
        timeout_secs = timeout.as_secs(),
        interval_secs = every.as_secs(),
        "Stuck job watchdog started"
    );

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Stuck job watchdog stopping");
                break;
            }
            _ = interval.tick() => {
                match sweep(jobs.as_ref(), timeout).await {
                    Ok(failed) => {
                        if failed > 0 {
                            tracing::warn!(failed, "Stuck job watchdog: failed stuck jobs");
                        } else {
                            tracing::debug!("Stuck job watchdog: nothing stuck");
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Stuck job watchdog: sweep failed");
                    }
                }
            }
        }
    }
}

/// Fail every open job whose last update is older than `timeout`.
/// Returns how many jobs this sweep moved to `failed`.
///
/// A `pending` job that old lost its execution task before it started; it
/// is walked through `processing` so both writes stay compare-and-set.
pub async fn sweep(jobs: &dyn JobStore, timeout: Duration) -> Result<usize, StoreError> {
    let age = chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::days(3650));
    let cutoff = Utc::now() - age;
    let reason = JobFailure::TimedOut(timeout.as_secs()).to_string();

    let mut failed = 0;
    for job in jobs.list_stuck(cutoff).await? {
        let result = match job.status {
            JobStatus::Pending => match jobs.transition(job.id, JobStatus::Processing, None).await {
                Ok(_) => jobs.transition(job.id, JobStatus::Failed, Some(&reason)).await,
                Err(e) => Err(e),
            },
            _ => jobs.transition(job.id, JobStatus::Failed, Some(&reason)).await,
        };
        match result {
            Ok(_) => {
                tracing::warn!(
                    job_id = %job.id,
                    model_id = %job.model_id,
                    stuck_in = %job.status,
                    "Stuck job failed",
                );
                failed += 1;
            }
            // The execution task moved it in the meantime.
            Err(StoreError::InvalidTransition { .. }) | Err(StoreError::NotFound(_)) => {
                tracing::debug!(job_id = %job.id, "Stuck job settled before the watchdog");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(failed)
}

fn sweep_interval(timeout: Duration) -> Duration {
    (timeout / 4).clamp(Duration::from_secs(1), MAX_SWEEP_INTERVAL)
}
