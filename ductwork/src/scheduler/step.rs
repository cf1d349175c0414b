//! Step declarations and the context handed to step bodies.

use crate::core::JobStatus;
use crate::errors::DuctworkError;
use crate::events::SharedEventSink;
use crate::jobs::{JobHandle, JobQueue};
use crate::store::{JobRecord, JobStore};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::json;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Future returned by a step body.
pub type StepFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Orchestration code run by a step.
///
/// Implemented for every `Fn(StepContext) -> impl Future<Output = anyhow::Result<()>>`.
pub trait StepBody: Send + Sync {
    /// Starts the body.
    fn call(&self, ctx: StepContext) -> StepFuture;
}

impl<F, Fut> StepBody for F
where
    F: Fn(StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn call(&self, ctx: StepContext) -> StepFuture {
        Box::pin((self)(ctx))
    }
}

/// A named step and the steps it runs after.
#[derive(Clone)]
pub struct StepSpec {
    name: String,
    after: Vec<String>,
    body: Arc<dyn StepBody>,
}

impl StepSpec {
    /// Creates a step without predecessors running an async closure.
    pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::with_body(name, body)
    }

    /// Creates a step without predecessors running a custom [`StepBody`].
    pub fn with_body(name: impl Into<String>, body: impl StepBody + 'static) -> Self {
        Self {
            name: name.into(),
            after: Vec::new(),
            body: Arc::new(body),
        }
    }

    /// Declares the steps that must finish before this one starts.
    #[must_use]
    pub fn after(mut self, steps: &[&str]) -> Self {
        self.after.extend(steps.iter().map(|s| (*s).to_string()));
        self
    }

    /// Returns the step name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the predecessor names.
    #[must_use]
    pub fn predecessors(&self) -> &[String] {
        &self.after
    }

    pub(crate) fn body(&self) -> Arc<dyn StepBody> {
        self.body.clone()
    }
}

impl fmt::Debug for StepSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepSpec")
            .field("name", &self.name)
            .field("after", &self.after)
            .finish_non_exhaustive()
    }
}

struct StepShared {
    step: String,
    queue: Arc<dyn JobQueue>,
    store: JobStore,
    events: SharedEventSink,
    jobs: Mutex<Vec<Uuid>>,
}

/// Handle given to a step body for submitting jobs.
///
/// Every job submitted through the context belongs to the step: the step
/// only finishes once all of them are terminal.
#[derive(Clone)]
pub struct StepContext {
    inner: Arc<StepShared>,
}

impl StepContext {
    pub(crate) fn new(
        step: impl Into<String>,
        queue: Arc<dyn JobQueue>,
        store: JobStore,
        events: SharedEventSink,
    ) -> Self {
        Self {
            inner: Arc::new(StepShared {
                step: step.into(),
                queue,
                store,
                events,
                jobs: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns the step name.
    #[must_use]
    pub fn step(&self) -> &str {
        &self.inner.step
    }

    /// Returns the ids of the jobs submitted so far.
    #[must_use]
    pub fn submitted_jobs(&self) -> Vec<Uuid> {
        self.inner.jobs.lock().clone()
    }

    /// Enqueues a job without waiting for it.
    pub async fn submit_async(&self, handle: JobHandle) -> Result<Uuid, DuctworkError> {
        self.submit(handle, "async").await
    }

    /// Enqueues a job and waits until it is terminal.
    ///
    /// Jobs submitted earlier by this step are waited for first. Returns the
    /// final status, `None` if the record has already expired.
    pub async fn submit_sync(&self, handle: JobHandle) -> Result<Option<JobStatus>, DuctworkError> {
        self.wait_for_jobs().await?;
        let id = self.submit(handle, "sync").await?;
        self.wait_for_jobs().await?;
        self.job_status(id).await
    }

    /// Reads the status of a job.
    pub async fn job_status(&self, id: Uuid) -> Result<Option<JobStatus>, DuctworkError> {
        Ok(self.inner.store.read_job(id).await?.map(|r| r.status))
    }

    /// Suspends until every job submitted so far is terminal.
    ///
    /// Each check that finds a running job yields to the scheduler, so the
    /// next check happens on its next pass.
    pub async fn wait_for_jobs(&self) -> Result<(), DuctworkError> {
        loop {
            let ids = self.submitted_jobs();
            if ids.is_empty() {
                return Ok(());
            }
            let records = self.inner.store.read_jobs(&ids).await?;
            if records.values().all(JobRecord::is_terminal) {
                return Ok(());
            }
            tokio::task::yield_now().await;
        }
    }

    async fn submit(&self, handle: JobHandle, mode: &str) -> Result<Uuid, DuctworkError> {
        let id = handle.id();
        let name = handle.name().to_string();
        self.inner.store.track_job(id, &name).await?;
        self.inner.jobs.lock().push(id);

        debug!(step = %self.inner.step, job_id = %id, job = %name, mode, "Submitting job");
        self.inner.queue.enqueue(handle).await?;
        self.inner.events.try_emit(
            "job.submitted",
            Some(json!({
                "step": self.inner.step,
                "job_id": id.to_string(),
                "job": name,
                "mode": mode,
            })),
        );
        Ok(id)
    }
}

impl fmt::Debug for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("step", &self.inner.step)
            .field("jobs", &self.inner.jobs.lock().len())
            .finish_non_exhaustive()
    }
}
