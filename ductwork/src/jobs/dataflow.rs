//! A job that builds and runs a dataflow graph.

use super::Job;
use crate::config::DataflowConfig;
use crate::dataflow::{run_graph, DataflowReport};
use crate::errors::DuctworkError;
use crate::events::{noop_sink, SharedEventSink};
use crate::graph::GraphDescriptor;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

/// Builds the graph of a [`DataflowJob`] each time it runs.
pub type GraphFactory = Box<dyn Fn() -> Result<GraphDescriptor, DuctworkError> + Send + Sync>;

/// Runs a freshly built graph with the configured runner.
pub struct DataflowJob {
    name: String,
    config: DataflowConfig,
    events: SharedEventSink,
    factory: GraphFactory,
    last_report: Mutex<Option<DataflowReport>>,
}

impl DataflowJob {
    /// Creates a job running the graphs built by `factory`.
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<GraphDescriptor, DuctworkError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            config: DataflowConfig::default(),
            events: noop_sink(),
            factory: Box::new(factory),
            last_report: Mutex::new(None),
        }
    }

    /// Sets the runner configuration.
    #[must_use]
    pub fn with_config(mut self, config: DataflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the event sink handed to the runner.
    #[must_use]
    pub fn with_event_sink(mut self, events: SharedEventSink) -> Self {
        self.events = events;
        self
    }

    /// Returns the report of the last successful run.
    #[must_use]
    pub fn last_report(&self) -> Option<DataflowReport> {
        self.last_report.lock().clone()
    }
}

impl std::fmt::Debug for DataflowJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataflowJob")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Job for DataflowJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> anyhow::Result<()> {
        let graph = (self.factory)()?;
        let report = run_graph(graph, &self.config, self.events.clone()).await?;
        info!(
            job = %self.name,
            graph = %report.graph,
            duration_ms = report.duration_ms,
            "Dataflow job finished"
        );
        *self.last_report.lock() = Some(report);
        Ok(())
    }
}
