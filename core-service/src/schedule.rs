//! Periodic sync scheduling.

use std::sync::Arc;
use std::time::Duration;

use core_sync::{JobQueue, JobRequest, SyncError};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handle to a recurring sync. Dropping it leaves the schedule running.
pub struct ScheduleHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ScheduleHandle {
    pub(crate) fn spawn(
        queue: Arc<JobQueue>,
        request: JobRequest,
        period: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(user_id = %request.user_id, period_secs = period.as_secs(), "Schedule started");

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match queue.enqueue(request).await {
                            Ok(job_id) => debug!(job_id = %job_id, "Scheduled sync enqueued"),
                            Err(SyncError::QueueClosed) => break,
                            Err(e) => warn!(error = %e, "Scheduled sync rejected"),
                        }
                    }
                }
            }

            info!(user_id = %request.user_id, "Schedule stopped");
        });

        Self { cancel, task }
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && !self.task.is_finished()
    }

    /// Stop the schedule and wait for its task to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Schedule task terminated abnormally");
        }
    }
}
