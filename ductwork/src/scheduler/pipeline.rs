//! A job that runs a step DAG.

use super::runner::validate_steps;
use super::{StepScheduler, StepSpec};
use crate::cancellation::CancellationToken;
use crate::config::SchedulerConfig;
use crate::errors::DuctworkError;
use crate::events::{noop_sink, SharedEventSink};
use crate::jobs::{Job, JobQueue};
use crate::store::JobStore;
use async_trait::async_trait;
use std::sync::Arc;

/// A named step DAG that can be submitted like any other job.
///
/// Each run builds a fresh [`StepScheduler`], so every run gets its own
/// pipeline record.
pub struct Pipeline {
    name: String,
    steps: Vec<StepSpec>,
    queue: Arc<dyn JobQueue>,
    store: JobStore,
    config: SchedulerConfig,
    events: SharedEventSink,
    cancel_token: Arc<CancellationToken>,
}

impl Pipeline {
    /// Creates a pipeline, rejecting invalid step DAGs.
    pub fn new(
        name: impl Into<String>,
        steps: Vec<StepSpec>,
        queue: Arc<dyn JobQueue>,
        store: JobStore,
    ) -> Result<Self, DuctworkError> {
        validate_steps(&steps)?;
        Ok(Self {
            name: name.into(),
            steps,
            queue,
            store,
            config: SchedulerConfig::default(),
            events: noop_sink(),
            cancel_token: Arc::new(CancellationToken::new()),
        })
    }

    /// Applies scheduler settings.
    #[must_use]
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: SharedEventSink) -> Self {
        self.events = events;
        self
    }

    /// Binds the pipeline to an existing stop token.
    #[must_use]
    pub fn with_cancel_token(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel_token = token;
        self
    }

    /// Stops running schedulers of this pipeline.
    pub fn stop(&self, reason: impl Into<String>) {
        self.cancel_token.cancel(reason);
    }

    /// Returns the steps.
    #[must_use]
    pub fn steps(&self) -> &[StepSpec] {
        &self.steps
    }

    /// Builds the scheduler for one run.
    pub fn scheduler(&self) -> Result<StepScheduler, DuctworkError> {
        Ok(StepScheduler::new(
            self.name.clone(),
            self.steps.clone(),
            self.queue.clone(),
            self.store.clone(),
        )?
        .with_config(&self.config)
        .with_event_sink(self.events.clone())
        .with_cancel_token(self.cancel_token.clone()))
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Job for Pipeline {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.scheduler()?.run().await?;
        Ok(())
    }
}
