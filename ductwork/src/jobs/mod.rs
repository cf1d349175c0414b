//! Background jobs and their status-tracked execution.
//!
//! A [`Job`] is a named unit of work. Jobs are submitted through a
//! [`JobQueue`], and their lifecycle (queued, working, completed or failed) is
//! published to a [`JobStore`](crate::store::JobStore) so that steps and
//! outside callers can poll it.

mod dataflow;
mod perform;
mod queue;

pub use dataflow::{DataflowJob, GraphFactory};
pub use perform::{perform, wait_until_done, PerformMode};
pub use queue::{execute_tracked, JobQueue, LocalJobQueue};

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// A unit of background work.
#[async_trait]
pub trait Job: Send + Sync {
    /// Returns the job name, used in logs and status records.
    fn name(&self) -> &str;

    /// Runs the job body.
    async fn run(&self) -> anyhow::Result<()>;
}

/// A submitted job: a stable id bound to its body.
#[derive(Clone)]
pub struct JobHandle {
    id: Uuid,
    job: Arc<dyn Job>,
}

impl JobHandle {
    /// Wraps `job` under a fresh id.
    pub fn new(job: impl Job + 'static) -> Self {
        Self::from_arc(Arc::new(job))
    }

    /// Wraps a shared job under a fresh id.
    #[must_use]
    pub fn from_arc(job: Arc<dyn Job>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job,
        }
    }

    /// Returns the job id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the job name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.job.name()
    }

    /// Returns the job body.
    #[must_use]
    pub fn job(&self) -> &Arc<dyn Job> {
        &self.job
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("name", &self.name())
            .finish()
    }
}

/// Boxed body of a [`FnJob`].
pub type JobFn = Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A job backed by an async closure.
pub struct FnJob {
    name: String,
    body: JobFn,
}

impl FnJob {
    /// Creates a job named `name` that runs `body` each time it is performed.
    pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            body: Box::new(move || Box::pin(body())),
        }
    }
}

impl fmt::Debug for FnJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnJob").field("name", &self.name).finish_non_exhaustive()
    }
}

#[async_trait]
impl Job for FnJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> anyhow::Result<()> {
        (self.body)().await
    }
}
