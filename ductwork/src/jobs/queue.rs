//! Job queue contract and the in-process queue.

use super::JobHandle;
use crate::core::JobStatus;
use crate::errors::{panic_message, DuctworkError};
use crate::observability::SpanTimer;
use crate::store::{JobRecord, JobStore};
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where jobs get executed.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Schedules the job and returns without waiting for it.
    async fn enqueue(&self, handle: JobHandle) -> Result<(), DuctworkError>;

    /// Runs the job to completion before returning.
    ///
    /// A failing job is reported as [`DuctworkError::JobFailed`].
    async fn perform_now(&self, handle: JobHandle) -> Result<(), DuctworkError>;
}

/// Runs a job while publishing its status to `store`.
///
/// The record moves to working, then to completed or failed. Errors and
/// panics raised by the body are captured in the record.
pub async fn execute_tracked(handle: &JobHandle, store: &JobStore) -> Result<(), DuctworkError> {
    let id = handle.id();
    let name = handle.name().to_string();
    let record = store
        .read_job(id)
        .await?
        .unwrap_or_else(|| JobRecord::queued(id, name.clone()));

    store
        .write_job(&record.clone().with_status(JobStatus::Working))
        .await?;
    debug!(job_id = %id, job = %name, "Job started");

    let timer = SpanTimer::start(name.clone());
    let outcome = AssertUnwindSafe(handle.job().run()).catch_unwind().await;
    let duration_ms = timer.finish();

    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("{e:#}")),
        Err(panic) => Some(format!("job panicked: {}", panic_message(panic.as_ref()))),
    };

    match failure {
        None => {
            store
                .write_job(&record.with_status(JobStatus::Completed))
                .await?;
            info!(job_id = %id, job = %name, duration_ms, "Job completed");
            Ok(())
        }
        Some(message) => {
            store.write_job(&record.failed(message.clone())).await?;
            warn!(job_id = %id, job = %name, duration_ms, error = %message, "Job failed");
            Err(DuctworkError::JobFailed { id, name, message })
        }
    }
}

/// Executes jobs on the current tokio runtime.
pub struct LocalJobQueue {
    store: JobStore,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LocalJobQueue {
    /// Creates a queue publishing status to `store`.
    #[must_use]
    pub fn new(store: JobStore) -> Self {
        Self {
            store,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Returns the status store.
    #[must_use]
    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Returns the number of enqueued jobs not yet drained.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.lock().iter().filter(|t| !t.is_finished()).count()
    }

    /// Waits for every job enqueued so far.
    pub async fn drain(&self) {
        loop {
            let tasks = std::mem::take(&mut *self.tasks.lock());
            if tasks.is_empty() {
                return;
            }
            for task in tasks {
                if let Err(e) = task.await {
                    warn!(error = %e, "Enqueued job task did not finish");
                }
            }
        }
    }
}

impl std::fmt::Debug for LocalJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalJobQueue")
            .field("store", &self.store)
            .field("tasks", &self.tasks.lock().len())
            .finish()
    }
}

#[async_trait]
impl JobQueue for LocalJobQueue {
    async fn enqueue(&self, handle: JobHandle) -> Result<(), DuctworkError> {
        let store = self.store.clone();
        debug!(job_id = %handle.id(), job = %handle.name(), "Job enqueued");
        let task = tokio::spawn(async move {
            // Failures are already recorded in the store.
            let _ = execute_tracked(&handle, &store).await;
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
        Ok(())
    }

    async fn perform_now(&self, handle: JobHandle) -> Result<(), DuctworkError> {
        execute_tracked(&handle, &self.store).await
    }
}
