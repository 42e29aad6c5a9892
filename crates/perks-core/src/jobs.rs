//! Per-session cooperative job scheduler.
//!
//! One scheduler per session actor, created lazily on first submission.
//! Jobs are cancelled (not persisted) when the session is torn down; there
//! is no durable queue.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Background work scoped to one session.
#[derive(Debug)]
pub struct JobScheduler {
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl JobScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Enqueue a background job. The job races the scheduler's cancellation
    /// token; a cancelled job is dropped mid-await, never resumed.
    pub fn run<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            tracing::debug!("Job rejected: scheduler already stopped");
            return;
        }
        let token = self.cancel.child_token();
        self.tracker.spawn(async move {
            // Biased: a job that is already done wins over a simultaneous
            // cancellation; a pending job still observes the token on the
            // next poll.
            tokio::select! {
                biased;
                () = job => {}
                () = token.cancelled() => {}
            }
        });
    }

    /// A token jobs can use to observe session teardown cooperatively.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Number of jobs still running.
    #[must_use]
    pub fn active_jobs(&self) -> usize {
        self.tracker.len()
    }

    /// Cancel all jobs and wait for them to wind down.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::debug!("Job scheduler stopped");
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}
