//! Dataflow execution engines.
//!
//! Two interchangeable runners execute a [`GraphDescriptor`]:
//! - [`CoroutineRunner`] drives every stage from a single task. Rows travel
//!   depth-first from each source, fanning out in declared order, so runs are
//!   fully deterministic.
//! - [`ParallelRunner`] spawns one task per stage joined by bounded channels,
//!   with a [`MergeTask`] wherever a pipe has several producers or several
//!   consumers. Ordering is only preserved along a single producer to
//!   consumer edge; rows merged from different producers interleave freely.
//!
//! Both runners open every stage's adapter before its first call and close it
//! on every exit path.

mod coroutine;
mod link;
mod merge;
mod parallel;


pub use coroutine::CoroutineRunner;
pub use merge::MergeTask;
pub use parallel::ParallelRunner;

use crate::config::DataflowConfig;
use crate::errors::DuctworkError;
use crate::events::SharedEventSink;
use crate::graph::GraphDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Which execution strategy runs a graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerKind {
    /// Single task, cooperative and deterministic.
    #[default]
    Coroutine,
    /// One task per stage, connected by channels.
    Parallel,
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Coroutine => write!(f, "coroutine"),
            Self::Parallel => write!(f, "parallel"),
        }
    }
}

/// Summary of a finished dataflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataflowReport {
    /// The graph name.
    pub graph: String,
    /// Rows handled per node: produced by sources, received by the others.
    pub rows: HashMap<String, usize>,
    /// Wall time of the run in milliseconds.
    pub duration_ms: f64,
}

impl DataflowReport {
    /// Returns the rows handled by `node`, zero if unknown.
    #[must_use]
    pub fn rows_for(&self, node: &str) -> usize {
        self.rows.get(node).copied().unwrap_or_default()
    }
}

/// Executes dataflow graphs.
#[async_trait]
pub trait DataflowRunner: Send + Sync {
    /// Runs `graph` to completion.
    ///
    /// The first stage error aborts the run and is returned.
    async fn run(&self, graph: GraphDescriptor) -> Result<DataflowReport, DuctworkError>;
}

/// Creates the runner configured by `config`.
#[must_use]
pub fn runner_for(config: &DataflowConfig, events: SharedEventSink) -> Box<dyn DataflowRunner> {
    match config.runner {
        RunnerKind::Coroutine => Box::new(CoroutineRunner::new().with_event_sink(events)),
        RunnerKind::Parallel => Box::new(
            ParallelRunner::new()
                .with_channel_capacity(config.effective_channel_capacity())
                .with_event_sink(events),
        ),
    }
}

/// Runs `graph` with the runner configured by `config`.
pub async fn run_graph(
    graph: GraphDescriptor,
    config: &DataflowConfig,
    events: SharedEventSink,
) -> Result<DataflowReport, DuctworkError> {
    runner_for(config, events).run(graph).await
}
