//! Single-task, cooperative dataflow runner.

use super::{DataflowReport, DataflowRunner};
use crate::adapters::AdapterScope;
use crate::cancellation::CancellationToken;
use crate::core::{Emitter, Row};
use crate::errors::{panic_message, DuctworkError, StageError};
use crate::events::{noop_sink, SharedEventSink};
use crate::graph::GraphDescriptor;
use crate::observability::SpanTimer;
use crate::stages::{StageBody, StageContext};
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::json;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What travels along an edge: a row, or the end of the upstream's stream.
#[derive(Debug, Clone)]
enum Signal {
    Row(Row),
    End,
}

/// One stage and its wiring.
struct Node {
    name: String,
    body: StageBody,
    ctx: StageContext,
    downstream: Vec<usize>,
    pending_upstreams: usize,
    finished: bool,
    rows: usize,
}

impl Node {
    /// Feeds one signal into a consumer, returning what it sends on.
    ///
    /// `End` only finishes the node once every upstream has ended; the node
    /// then forwards its trailing rows followed by `End`.
    async fn deliver(&mut self, signal: Signal) -> Result<Vec<Signal>, StageError> {
        match signal {
            Signal::Row(row) => {
                self.rows += 1;
                match &mut self.body {
                    StageBody::Transform(transform) => {
                        let mut out = Emitter::new();
                        transform.process(row, &mut self.ctx, &mut out).await?;
                        Ok(out.into_rows().into_iter().map(Signal::Row).collect())
                    }
                    StageBody::Destination(destination) => {
                        destination.write(row, &mut self.ctx).await?;
                        Ok(Vec::new())
                    }
                    StageBody::Source(_) => Err(StageError::contract(format!(
                        "source '{}' cannot receive rows",
                        self.name
                    ))),
                }
            }
            Signal::End => {
                self.pending_upstreams = self.pending_upstreams.saturating_sub(1);
                if self.pending_upstreams > 0 || self.finished {
                    return Ok(Vec::new());
                }
                let mut forwarded = Vec::new();
                match &mut self.body {
                    StageBody::Transform(transform) => {
                        let mut out = Emitter::new();
                        transform.close(&mut self.ctx, &mut out).await?;
                        forwarded.extend(out.into_rows().into_iter().map(Signal::Row));
                    }
                    StageBody::Destination(destination) => destination.close(&mut self.ctx).await?,
                    StageBody::Source(_) => {}
                }
                self.finish().await?;
                forwarded.push(Signal::End);
                Ok(forwarded)
            }
        }
    }

    async fn finish(&mut self) -> Result<(), StageError> {
        self.finished = true;
        self.ctx.release_adapter().await?;
        Ok(())
    }
}

/// Runs a graph on the calling task.
///
/// Sources run one after another in declaration order. Each produced row is
/// pushed depth-first through the graph before the source is asked for the
/// next one; fan-out follows the declared consumer order. A stage error
/// aborts the run after every adapter has been released.
pub struct CoroutineRunner {
    events: SharedEventSink,
    cancel_token: Arc<CancellationToken>,
}

impl CoroutineRunner {
    /// Creates a runner with no event sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: noop_sink(),
            cancel_token: Arc::new(CancellationToken::new()),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: SharedEventSink) -> Self {
        self.events = events;
        self
    }

    /// Uses `token` to stop runs. A cancelled token stops every later run too.
    #[must_use]
    pub fn with_cancel_token(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel_token = token;
        self
    }

    /// Returns the token stopping this runner.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel_token
    }

    fn build_nodes(graph: GraphDescriptor) -> (String, Vec<Node>) {
        let index: HashMap<String, usize> = graph
            .stages()
            .iter()
            .enumerate()
            .map(|(i, stage)| (stage.name().to_string(), i))
            .collect();
        let wiring: Vec<(Vec<usize>, usize)> = graph
            .stages()
            .iter()
            .map(|stage| {
                let downstream = graph
                    .downstream_of(stage.name())
                    .iter()
                    .filter_map(|name| index.get(name).copied())
                    .collect();
                (downstream, graph.upstream_of(stage.name()).len())
            })
            .collect();

        let (name, stages, _) = graph.into_parts();
        let nodes = stages
            .into_iter()
            .zip(wiring)
            .map(|(stage, (downstream, pending_upstreams))| {
                let (name, body, adapter, options) = stage.into_parts();
                let scope = adapter.map_or_else(AdapterScope::unbound, |binding| {
                    AdapterScope::bound(binding.name, binding.adapter)
                });
                Node {
                    ctx: StageContext::new(name.clone(), options, scope),
                    name,
                    body,
                    downstream,
                    pending_upstreams,
                    finished: false,
                    rows: 0,
                }
            })
            .collect();
        (name, nodes)
    }

    /// Pushes `signal` from `from` through the graph, depth-first.
    async fn propagate(
        &self,
        nodes: &mut [Node],
        from: usize,
        signal: Signal,
    ) -> Result<(), DuctworkError> {
        let mut stack: Vec<(usize, Signal)> = nodes[from]
            .downstream
            .iter()
            .rev()
            .map(|&to| (to, signal.clone()))
            .collect();

        while let Some((idx, signal)) = stack.pop() {
            let node = &mut nodes[idx];
            let outputs = node
                .deliver(signal)
                .await
                .map_err(|e| DuctworkError::stage(node.name.clone(), e))?;
            if matches!(outputs.last(), Some(Signal::End)) {
                debug!(node = %node.name, rows = node.rows, "Stage finished");
                self.events.try_emit(
                    "dataflow.stage.finished",
                    Some(json!({"node": node.name, "rows": node.rows})),
                );
            }
            for output in outputs.into_iter().rev() {
                for &to in node.downstream.iter().rev() {
                    stack.push((to, output.clone()));
                }
            }
        }
        Ok(())
    }

    async fn drive(&self, nodes: &mut [Node]) -> Result<(), DuctworkError> {
        for node in nodes.iter_mut() {
            node.ctx
                .open_adapter()
                .await
                .map_err(|e| DuctworkError::stage(node.name.clone(), e.into()))?;
        }

        for idx in 0..nodes.len() {
            if !matches!(nodes[idx].body, StageBody::Source(_)) {
                continue;
            }
            loop {
                if self.cancel_token.is_cancelled() {
                    return Err(DuctworkError::Cancelled(
                        self.cancel_token.reason().unwrap_or_default(),
                    ));
                }
                let node = &mut nodes[idx];
                let next = match &mut node.body {
                    StageBody::Source(source) => source.next_row(&mut node.ctx).await,
                    _ => Ok(None),
                }
                .map_err(|e| DuctworkError::stage(node.name.clone(), e))?;

                match next {
                    Some(row) => {
                        node.rows += 1;
                        self.propagate(nodes, idx, Signal::Row(row)).await?;
                    }
                    None => break,
                }
            }

            let node = &mut nodes[idx];
            node.finish()
                .await
                .map_err(|e| DuctworkError::stage(node.name.clone(), e))?;
            debug!(node = %node.name, rows = node.rows, "Source exhausted");
            self.events.try_emit(
                "dataflow.stage.finished",
                Some(json!({"node": node.name, "rows": node.rows})),
            );
            self.propagate(nodes, idx, Signal::End).await?;
        }

        for node in nodes.iter().filter(|n| !n.finished) {
            warn!(node = %node.name, "Stage never received end of stream");
        }
        Ok(())
    }
}

impl Default for CoroutineRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CoroutineRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoroutineRunner")
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish()
    }
}

#[async_trait]
impl DataflowRunner for CoroutineRunner {
    async fn run(&self, graph: GraphDescriptor) -> Result<DataflowReport, DuctworkError> {
        let timer = SpanTimer::start("dataflow.coroutine");
        let (graph_name, mut nodes) = Self::build_nodes(graph);
        info!(graph = %graph_name, stages = nodes.len(), "Starting coroutine dataflow");
        self.events.try_emit(
            "dataflow.started",
            Some(json!({"graph": graph_name, "runner": "coroutine"})),
        );

        let result = match AssertUnwindSafe(self.drive(&mut nodes)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(DuctworkError::Internal(format!(
                "Dataflow '{graph_name}' panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };

        // Stages that did not finish still hold open adapters.
        for node in &mut nodes {
            if let Err(e) = node.ctx.release_adapter().await {
                warn!(node = %node.name, error = %e, "Failed to release adapter");
            }
        }

        let duration_ms = timer.finish();
        match result {
            Ok(()) => {
                info!(graph = %graph_name, duration_ms, "Dataflow completed");
                self.events.try_emit(
                    "dataflow.completed",
                    Some(json!({"graph": graph_name, "duration_ms": duration_ms})),
                );
                Ok(DataflowReport {
                    rows: nodes.iter().map(|n| (n.name.clone(), n.rows)).collect(),
                    graph: graph_name,
                    duration_ms,
                })
            }
            Err(e) => {
                warn!(graph = %graph_name, error = %e, "Dataflow failed");
                self.events.try_emit(
                    "dataflow.failed",
                    Some(json!({"graph": graph_name, "error": e.to_string()})),
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::stages::{FnTransform, IterSource};
    use crate::testing::{CollectingEventSink, Recorder};
    use pretty_assertions::assert_eq;

    fn numbers(n: i64) -> IterSource<std::vec::IntoIter<Row>> {
        IterSource::new((1..=n).map(|i| json!(i)).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn test_depth_first_fan_out_order() {
        let log = Recorder::new();
        let graph = GraphBuilder::new("order")
            .source("numbers", numbers(2))
            .destination("a", log.destination("a"))
            .destination("b", log.destination("b"))
            .send_to("numbers", &["a", "b"])
            .build()
            .unwrap();

        CoroutineRunner::new().run(graph).await.unwrap();

        assert_eq!(
            log.entries(),
            vec![
                "a:1".to_string(),
                "b:1".to_string(),
                "a:2".to_string(),
                "b:2".to_string(),
                "a:close".to_string(),
                "b:close".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_transform_cardinality_and_report() {
        let log = Recorder::new();
        let graph = GraphBuilder::new("expand")
            .source("numbers", numbers(3))
            .transform(
                "evens_twice",
                FnTransform::new(|row: Row, out: &mut Emitter| {
                    if row.as_i64().unwrap_or_default() % 2 == 0 {
                        out.emit(row.clone());
                        out.emit(row);
                    }
                    Ok(())
                }),
            )
            .destination("out", log.destination("out"))
            .send_to("numbers", &["evens_twice"])
            .send_to("evens_twice", &["out"])
            .build()
            .unwrap();

        let report = CoroutineRunner::new().run(graph).await.unwrap();

        assert_eq!(log.rows("out"), vec![json!(2), json!(2)]);
        assert_eq!(report.rows_for("numbers"), 3);
        assert_eq!(report.rows_for("evens_twice"), 3);
        assert_eq!(report.rows_for("out"), 2);
        assert_eq!(report.graph, "expand");
    }

    #[tokio::test]
    async fn test_fan_in_closes_after_last_upstream() {
        let log = Recorder::new();
        let graph = GraphBuilder::new("fan-in")
            .source("left", numbers(1))
            .source("right", numbers(2))
            .destination("out", log.destination("out"))
            .send_to("left", &["out"])
            .send_to("right", &["out"])
            .build()
            .unwrap();

        CoroutineRunner::new().run(graph).await.unwrap();

        assert_eq!(
            log.entries(),
            vec!["out:1", "out:1", "out:2", "out:close"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let events = Arc::new(CollectingEventSink::new());
        let log = Recorder::new();
        let graph = GraphBuilder::new("events")
            .source("numbers", numbers(1))
            .destination("out", log.destination("out"))
            .send_to("numbers", &["out"])
            .build()
            .unwrap();

        CoroutineRunner::new()
            .with_event_sink(events.clone())
            .run(graph)
            .await
            .unwrap();

        assert_eq!(
            events.event_types(),
            vec![
                "dataflow.started",
                "dataflow.stage.finished",
                "dataflow.stage.finished",
                "dataflow.completed",
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_runner_stops() {
        let token = Arc::new(CancellationToken::new());
        token.cancel("shutdown");
        let graph = GraphBuilder::new("stopped")
            .source("numbers", numbers(3))
            .build()
            .unwrap();

        let err = CoroutineRunner::new()
            .with_cancel_token(token)
            .run(graph)
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
    }
}
