//! Periodic purge of old terminal generation jobs.
//!
//! Jobs are never deleted by the request path. This loop removes
//! `completed` and `failed` jobs whose `completed_at` is older than the
//! configured retention period, together with the reference images staged
//! for them. Generated images belong to session messages and are kept.

use std::sync::Arc;
use std::time::Duration;

use atelier_core::params::ReferenceImage;
use atelier_core::storage::BinaryStore;
use atelier_db::{JobStore, StoreError};
use tokio_util::sync::CancellationToken;

use crate::engine::orchestrator::reference_prefix;

/// How often the purge runs.
const PURGE_INTERVAL: Duration = Duration::from_secs(3600); // 1 hour

/// Run the job retention loop until `cancel` is triggered.
pub async fn run(
    jobs: Arc<dyn JobStore>,
    binaries: Arc<dyn BinaryStore>,
    retention_days: i64,
    cancel: CancellationToken,
) {
    tracing::info!(
        retention_days,
        interval_secs = PURGE_INTERVAL.as_secs(),
        "Job retention task started"
    );

    let retention = chrono::Duration::days(retention_days);
    let mut interval = tokio::time::interval(PURGE_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job retention task stopping");
                break;
            }
            _ = interval.tick() => {
                match purge(jobs.as_ref(), binaries.as_ref(), retention).await {
                    Ok(deleted) => {
                        if deleted > 0 {
                            tracing::info!(deleted, "Job retention: purged old jobs");
                        } else {
                            tracing::debug!("Job retention: no jobs to purge");
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Job retention: purge failed");
                    }
                }
            }
        }
    }
}

/// Delete terminal jobs older than `retention` and their staged reference
/// images. Returns how many jobs were removed.
///
/// Object deletion is best effort; a failure is logged and the next job
/// is still processed.
pub async fn purge(
    jobs: &dyn JobStore,
    binaries: &dyn BinaryStore,
    retention: chrono::Duration,
) -> Result<usize, StoreError> {
    let purged = jobs.purge_terminal_older_than(retention).await?;

    for job in &purged {
        let prefix = reference_prefix(job.id);
        for image in &job.params.reference_images {
            let ReferenceImage::Stored { key } = image else {
                continue;
            };
            if !key.starts_with(&prefix) {
                continue;
            }
            if let Err(e) = binaries.delete(key).await {
                tracing::warn!(job_id = %job.id, key, error = %e, "Failed to delete staged reference");
            }
        }
    }

    Ok(purged.len())
}
