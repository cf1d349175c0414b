//! Running a job and waiting for everything it started.

use super::{JobHandle, JobQueue};
use crate::cancellation::CancellationToken;
use crate::errors::DuctworkError;
use crate::store::JobStore;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// How [`perform`] executes the job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformMode {
    /// Run inline; a failure is returned to the caller.
    #[default]
    Sync,
    /// Enqueue; a failure is only visible in the store.
    Async,
}

/// Registers and runs `handle`, then waits until every tracked job and
/// pipeline in `store` is terminal.
///
/// Jobs submitted by the job itself (for instance the steps of a pipeline)
/// are waited for as well.
pub async fn perform(
    handle: JobHandle,
    mode: PerformMode,
    queue: &dyn JobQueue,
    store: &JobStore,
    poll: Duration,
    stop: &CancellationToken,
) -> Result<(), DuctworkError> {
    store.track_job(handle.id(), handle.name()).await?;
    info!(job_id = %handle.id(), job = %handle.name(), ?mode, "Performing job");

    match mode {
        PerformMode::Sync => queue.perform_now(handle).await?,
        PerformMode::Async => queue.enqueue(handle).await?,
    }

    wait_until_done(store, poll, stop).await
}

/// Polls `store` every `poll` until nothing tracked is still running.
///
/// Returns [`DuctworkError::Cancelled`] when `stop` fires first.
pub async fn wait_until_done(
    store: &JobStore,
    poll: Duration,
    stop: &CancellationToken,
) -> Result<(), DuctworkError> {
    loop {
        if store.all_done().await? {
            return Ok(());
        }
        debug!("Waiting for tracked jobs");
        tokio::select! {
            biased;
            () = stop.cancelled() => {
                let reason = stop.reason().unwrap_or_else(|| "stopped".to_string());
                return Err(DuctworkError::Cancelled(reason));
            }
            () = tokio::time::sleep(poll) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::JobStatus;
    use crate::jobs::{FnJob, LocalJobQueue};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sync_perform_returns_job_errors() {
        let store = JobStore::in_memory();
        let queue = LocalJobQueue::new(store.clone());
        let handle = JobHandle::new(FnJob::new("bad", || async { anyhow::bail!("broken") }));

        let err = perform(
            handle.clone(),
            PerformMode::Sync,
            &queue,
            &store,
            Duration::from_millis(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DuctworkError::JobFailed { .. }));
        let record = store.read_job(handle.id()).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_async_perform_waits_for_completion() {
        let store = JobStore::in_memory();
        let queue = LocalJobQueue::new(store.clone());
        let handle = JobHandle::new(FnJob::new("slow", || async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(())
        }));

        perform(
            handle.clone(),
            PerformMode::Async,
            &queue,
            &store,
            Duration::from_millis(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let record = store.read_job(handle.id()).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_stop_unblocks_waiting() {
        let store = JobStore::in_memory();
        store.track_job(uuid::Uuid::new_v4(), "stuck").await.unwrap();
        let stop = Arc::new(CancellationToken::new());

        let trigger = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel("interrupted");
        });

        let err = wait_until_done(&store, Duration::from_secs(60), &stop)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Cancelled: interrupted");
    }
}
