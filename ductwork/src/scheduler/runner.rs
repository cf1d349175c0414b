//! The step scheduler: a dependency-ordered DAG driven by coarse polling.

use super::{StepContext, StepSpec};
use crate::cancellation::CancellationToken;
use crate::config::SchedulerConfig;
use crate::core::JobStatus;
use crate::errors::{
    panic_message, ContractErrorInfo, CycleDetectedError, DuctworkError, GraphValidationError,
};
use crate::events::{noop_sink, SharedEventSink};
use crate::jobs::JobQueue;
use crate::observability::SpanTimer;
use crate::store::{JobStore, PipelineRecord};
use anyhow::anyhow;
use futures::future::BoxFuture;
use futures::FutureExt;
use futures::task::noop_waker_ref;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

type StepTask = BoxFuture<'static, Result<(), DuctworkError>>;

struct RunningStep {
    name: String,
    ctx: StepContext,
    task: StepTask,
}

/// Runs steps once their predecessors have finished.
///
/// Each pass resumes every unfinished step once, then the scheduler sleeps
/// for one tick. A step waiting on predecessors or jobs simply yields, so
/// progress is observed at most one tick late.
pub struct StepScheduler {
    id: Uuid,
    name: String,
    steps: Vec<StepSpec>,
    queue: Arc<dyn JobQueue>,
    store: JobStore,
    tick: Duration,
    events: SharedEventSink,
    cancel_token: Arc<CancellationToken>,
}

impl StepScheduler {
    /// Creates a scheduler, rejecting invalid step DAGs.
    pub fn new(
        name: impl Into<String>,
        steps: Vec<StepSpec>,
        queue: Arc<dyn JobQueue>,
        store: JobStore,
    ) -> Result<Self, DuctworkError> {
        validate_steps(&steps)?;
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            steps,
            queue,
            store,
            tick: SchedulerConfig::default().tick(),
            events: noop_sink(),
            cancel_token: Arc::new(CancellationToken::new()),
        })
    }

    /// Sets the pause between passes.
    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Applies scheduler settings.
    #[must_use]
    pub fn with_config(self, config: &SchedulerConfig) -> Self {
        self.with_tick(config.tick())
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: SharedEventSink) -> Self {
        self.events = events;
        self
    }

    /// Binds the scheduler to an existing stop token.
    #[must_use]
    pub fn with_cancel_token(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel_token = token;
        self
    }

    /// Returns the token that stops the scheduler.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel_token
    }

    /// Stops a running scheduler at its next tick.
    pub fn stop(&self, reason: impl Into<String>) {
        self.cancel_token.cancel(reason);
    }

    /// Returns the pipeline id under which progress is recorded.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the scheduler name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the step names in declaration order.
    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(StepSpec::name).collect()
    }

    /// Runs every step to completion.
    ///
    /// Progress is written to the store as a [`PipelineRecord`], which is also
    /// returned. A failing or panicking step body aborts the run and marks the
    /// record failed; failed jobs do not.
    pub async fn run(&self) -> Result<PipelineRecord, DuctworkError> {
        let timer = SpanTimer::start(self.name.clone());
        let mut record = PipelineRecord::queued(self.id, &self.name, self.step_names());
        self.store.register_pipeline(&record).await?;
        record.set_status(JobStatus::Working);
        self.store.write_pipeline(&record).await?;
        info!(pipeline = %self.name, steps = self.steps.len(), "Scheduler started");

        let outcome = self.drive(&mut record).await;
        let duration_ms = timer.finish();

        match &outcome {
            Ok(()) => record.set_status(JobStatus::Completed),
            Err(e) => {
                warn!(pipeline = %self.name, error = %e, duration_ms, "Scheduler failed");
                record.set_status(JobStatus::Failed);
            }
        }
        self.store.write_pipeline(&record).await?;
        outcome?;

        info!(pipeline = %self.name, duration_ms, "Scheduler completed");
        self.events.try_emit(
            "scheduler.completed",
            Some(json!({
                "pipeline": self.name,
                "pipeline_id": self.id.to_string(),
                "duration_ms": duration_ms,
            })),
        );
        Ok(record)
    }

    async fn drive(&self, record: &mut PipelineRecord) -> Result<(), DuctworkError> {
        let flags: HashMap<&str, Arc<AtomicBool>> = self
            .steps
            .iter()
            .map(|s| (s.name(), Arc::new(AtomicBool::new(false))))
            .collect();

        let mut remaining: Vec<RunningStep> = Vec::with_capacity(self.steps.len());
        for spec in &self.steps {
            let predecessors: Vec<Arc<AtomicBool>> = spec
                .predecessors()
                .iter()
                .filter_map(|p| flags.get(p.as_str()).cloned())
                .collect();
            let finished = flags
                .get(spec.name())
                .cloned()
                .ok_or_else(|| {
                    DuctworkError::Internal(format!("No flag for step '{}'", spec.name()))
                })?;
            let ctx = StepContext::new(
                spec.name(),
                self.queue.clone(),
                self.store.clone(),
                self.events.clone(),
            );
            remaining.push(RunningStep {
                name: spec.name().to_string(),
                ctx: ctx.clone(),
                task: Box::pin(run_step(
                    spec.clone(),
                    ctx,
                    predecessors,
                    finished,
                    self.events.clone(),
                )),
            });
        }

        loop {
            if self.cancel_token.is_cancelled() {
                return Err(self.cancelled());
            }

            let (finished, failure) = poll_pass(&mut remaining);
            for step in finished {
                record.finish_step(&step.name, step.ctx.submitted_jobs());
                self.store.write_pipeline(record).await?;
            }
            if let Some(e) = failure {
                return Err(e);
            }
            if remaining.is_empty() {
                return Ok(());
            }

            tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => return Err(self.cancelled()),
                () = tokio::time::sleep(self.tick) => {}
            }
        }
    }

    fn cancelled(&self) -> DuctworkError {
        let reason = self
            .cancel_token
            .reason()
            .unwrap_or_else(|| "scheduler stopped".to_string());
        info!(pipeline = %self.name, %reason, "Scheduler stopped");
        DuctworkError::Cancelled(reason)
    }
}

impl std::fmt::Debug for StepScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepScheduler")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("steps", &self.steps)
            .field("tick", &self.tick)
            .finish_non_exhaustive()
    }
}

/// Resumes every step once, in declaration order.
///
/// Returns the steps that finished during this pass and the first step
/// error, which ends the pass early.
fn poll_pass(remaining: &mut Vec<RunningStep>) -> (Vec<RunningStep>, Option<DuctworkError>) {
    let mut cx = Context::from_waker(noop_waker_ref());
    let mut finished = Vec::new();
    let mut index = 0;
    while index < remaining.len() {
        match remaining[index].task.as_mut().poll(&mut cx) {
            Poll::Pending => index += 1,
            Poll::Ready(result) => {
                let step = remaining.remove(index);
                if let Err(e) = result {
                    return (finished, Some(e));
                }
                finished.push(step);
            }
        }
    }
    (finished, None)
}

async fn run_step(
    spec: StepSpec,
    ctx: StepContext,
    predecessors: Vec<Arc<AtomicBool>>,
    finished: Arc<AtomicBool>,
    events: SharedEventSink,
) -> Result<(), DuctworkError> {
    while !predecessors.iter().all(|p| p.load(Ordering::SeqCst)) {
        tokio::task::yield_now().await;
    }

    let name = spec.name().to_string();
    debug!(step = %name, "Step started");
    events.try_emit("step.started", Some(json!({ "step": name })));

    let outcome = AssertUnwindSafe(spec.body().call(ctx.clone()))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(anyhow!("step panicked: {}", panic_message(panic.as_ref())))
        });
    outcome.map_err(|source| DuctworkError::Step {
        step: name.clone(),
        source,
    })?;
    ctx.wait_for_jobs().await?;

    finished.store(true, Ordering::SeqCst);
    let jobs = ctx.submitted_jobs().len();
    info!(step = %name, jobs, "Step finished");
    events.try_emit("step.finished", Some(json!({ "step": name, "jobs": jobs })));
    Ok(())
}

/// Checks that step names are unique, predecessors exist and the DAG is acyclic.
pub(crate) fn validate_steps(steps: &[StepSpec]) -> Result<(), DuctworkError> {
    if steps.is_empty() {
        return Err(step_error(
            "STEP-004-EMPTY",
            "Step DAG has no steps".to_string(),
            Vec::new(),
        ));
    }

    let mut predecessors: HashMap<&str, &[String]> = HashMap::new();
    for step in steps {
        if predecessors.insert(step.name(), step.predecessors()).is_some() {
            return Err(step_error(
                "STEP-001-DUPLICATE",
                format!("Duplicate step name '{}'", step.name()),
                vec![step.name().to_string()],
            ));
        }
    }

    for step in steps {
        if let Some(unknown) = step
            .predecessors()
            .iter()
            .find(|p| !predecessors.contains_key(p.as_str()))
        {
            return Err(step_error(
                "STEP-002-UNKNOWN",
                format!("Step '{}' runs after unknown step '{unknown}'", step.name()),
                vec![step.name().to_string(), unknown.clone()],
            ));
        }
    }

    let mut visited = HashSet::new();
    let mut on_path = HashSet::new();
    let mut path = Vec::new();
    for step in steps {
        if !visited.contains(step.name()) {
            let cycle = find_cycle(
                step.name(),
                &predecessors,
                &mut visited,
                &mut on_path,
                &mut path,
            );
            if let Some(cycle) = cycle {
                return Err(DuctworkError::CycleDetected(CycleDetectedError::new(cycle)));
            }
        }
    }
    Ok(())
}

fn find_cycle<'a>(
    step: &'a str,
    predecessors: &HashMap<&'a str, &'a [String]>,
    visited: &mut HashSet<&'a str>,
    on_path: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(step);
    on_path.insert(step);
    path.push(step);

    for dep in predecessors.get(step).copied().unwrap_or_default() {
        let dep = dep.as_str();
        if on_path.contains(dep) {
            let start = path.iter().position(|s| *s == dep).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].iter().map(|s| (*s).to_string()).collect();
            cycle.push(dep.to_string());
            return Some(cycle);
        }
        if !visited.contains(dep) {
            if let Some(cycle) = find_cycle(dep, predecessors, visited, on_path, path) {
                return Some(cycle);
            }
        }
    }

    path.pop();
    on_path.remove(step);
    None
}

fn step_error(code: &str, message: String, steps: Vec<String>) -> DuctworkError {
    let info = ContractErrorInfo::new(code, message.clone());
    DuctworkError::Validation(
        GraphValidationError::new(message)
            .with_nodes(steps)
            .with_error_info(info),
    )
}
