//! Fluent graph builder.

use super::{GraphDescriptor, PipeEdge, StageDescriptor};
use crate::errors::GraphValidationError;
use crate::stages::{Destination, Source, Transform};

/// Builder for creating validated dataflow graphs.
///
/// Stages keep their declaration order; forwarding order within a pipe is
/// the order given to [`GraphBuilder::send_to`].
#[derive(Debug)]
pub struct GraphBuilder {
    /// The graph name.
    name: String,
    /// Declared stages.
    stages: Vec<StageDescriptor>,
    /// Declared pipes.
    pipes: Vec<PipeEdge>,
}

impl GraphBuilder {
    /// Creates a new graph builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            pipes: Vec::new(),
        }
    }

    /// Adds a stage descriptor.
    #[must_use]
    pub fn stage(mut self, stage: StageDescriptor) -> Self {
        self.stages.push(stage);
        self
    }

    /// Adds a source node.
    #[must_use]
    pub fn source(self, name: impl Into<String>, source: impl Source + 'static) -> Self {
        self.stage(StageDescriptor::source(name, source))
    }

    /// Adds a transform node.
    #[must_use]
    pub fn transform(self, name: impl Into<String>, transform: impl Transform + 'static) -> Self {
        self.stage(StageDescriptor::transform(name, transform))
    }

    /// Adds a lookup node.
    #[must_use]
    pub fn lookup(self, name: impl Into<String>, lookup: impl Transform + 'static) -> Self {
        self.stage(StageDescriptor::lookup(name, lookup))
    }

    /// Adds a destination node.
    #[must_use]
    pub fn destination(
        self,
        name: impl Into<String>,
        destination: impl Destination + 'static,
    ) -> Self {
        self.stage(StageDescriptor::destination(name, destination))
    }

    /// Declares that `from` forwards every row to each of `to`, in order.
    #[must_use]
    pub fn send_to(mut self, from: impl Into<String>, to: &[&str]) -> Self {
        self.pipes.push(PipeEdge::new(from, to.iter().copied()));
        self
    }

    /// Returns the number of declared stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Validates and builds the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is empty or miswired.
    pub fn build(self) -> Result<GraphDescriptor, GraphValidationError> {
        GraphDescriptor::new(self.name, self.stages, self.pipes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Emitter;
    use crate::stages::{FnDestination, FnTransform, IterSource};
    use serde_json::json;

    #[test]
    fn test_builder_fan_out() {
        let graph = GraphBuilder::new("fan-out")
            .source("numbers", IterSource::new(vec![json!(1), json!(2)]))
            .transform(
                "copy",
                FnTransform::new(|row, out: &mut Emitter| {
                    out.emit(row);
                    Ok(())
                }),
            )
            .destination("left", FnDestination::new(|_row| Ok(())))
            .destination("right", FnDestination::new(|_row| Ok(())))
            .send_to("numbers", &["copy"])
            .send_to("copy", &["left", "right"])
            .build()
            .unwrap();

        assert_eq!(graph.name(), "fan-out");
        assert_eq!(graph.downstream_of("copy"), ["left".to_string(), "right".to_string()]);
    }

    #[test]
    fn test_builder_reports_validation_errors() {
        let builder = GraphBuilder::new("broken")
            .source("numbers", IterSource::new(Vec::<serde_json::Value>::new()))
            .send_to("numbers", &["nowhere"]);
        assert_eq!(builder.stage_count(), 1);

        let err = builder.build().unwrap_err();
        assert_eq!(err.code(), Some("GRAPH-003-UNKNOWN_NODE"));
    }
}
