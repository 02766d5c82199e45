//! Ownership of detached generation tasks.
//!
//! Submissions return before their job runs. Every execution task is
//! spawned on one [`TaskTracker`] so shutdown can stop accepting new work
//! and wait, with a bound, for the jobs already in flight.

use std::future::Future;
use std::time::Duration;

use atelier_core::types::JobId;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

#[derive(Debug, Clone, Default)]
pub struct JobSupervisor {
    tracker: TaskTracker,
}

impl JobSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` detached, inside a span carrying the job id.
    pub fn spawn<F>(&self, job_id: JobId, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let span = tracing::info_span!("generation", %job_id);
        self.tracker.spawn(task.instrument(span));
    }

    /// Number of execution tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Close the tracker and wait up to `timeout` for in-flight tasks.
    ///
    /// Returns `false` when tasks were still running at the deadline; those
    /// are abandoned with the runtime and their jobs stay in `processing`
    /// until the stuck-job watchdog fails them.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok()
    }

    /// Wait for every task spawned so far, then keep accepting work.
    pub async fn settle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
