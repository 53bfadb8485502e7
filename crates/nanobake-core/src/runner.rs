//! Background execution of generation jobs

use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::error;

use crate::engine::{GenerationEngine, JobInput};
use crate::job::JobStatus;

/// Spawns engine runs onto the tokio runtime and tracks them until they finish
#[derive(Debug, Clone, Default)]
pub struct JobRunner {
    tracker: TaskTracker,
}

impl JobRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a job in the background
    ///
    /// The handle resolves to the job's terminal status. Dropping it detaches
    /// the task; the job still runs to the end. A panicking run marks the job
    /// failed rather than leaving it processing.
    pub fn spawn(&self, engine: GenerationEngine, input: JobInput) -> JoinHandle<JobStatus> {
        let id = input.id;
        self.tracker.spawn(async move {
            match AssertUnwindSafe(engine.run(input)).catch_unwind().await {
                Ok(status) => status,
                Err(_) => {
                    error!(job_id = %id, "Generation task panicked");
                    let _ = engine
                        .store()
                        .fail(id, "Generation task aborted unexpectedly".to_string())
                        .await;
                    JobStatus::Failed
                }
            }
        })
    }

    /// Jobs spawned and not yet finished
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every job spawned so far to finish
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
