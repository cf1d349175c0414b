//! Task-per-stage dataflow runner.

use super::link::{forward, receive};
use super::{DataflowReport, DataflowRunner, MergeTask};
use crate::adapters::AdapterScope;
use crate::cancellation::{CancellationToken, TaskGroup};
use crate::core::{Emitter, Row};
use crate::errors::{panic_message, DuctworkError, StageError};
use crate::events::{noop_sink, SharedEventSink};
use crate::graph::GraphDescriptor;
use crate::observability::SpanTimer;
use crate::stages::{Destination, Source, StageBody, StageContext, Transform};
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tracing::{debug, info, warn};

/// Consumers sharing the same set of producers.
struct ConsumerGroup {
    producers: Vec<usize>,
    consumers: Vec<usize>,
}

/// Channel endpoints of every node, once the graph is wired.
struct Wiring {
    inboxes: Vec<Option<Receiver<Row>>>,
    outboxes: Vec<Vec<Sender<Row>>>,
    merges: Vec<MergeTask>,
}

/// State shared by every task of one run.
#[derive(Clone)]
struct RunShared {
    token: Arc<CancellationToken>,
    events: SharedEventSink,
    rows: Arc<Mutex<HashMap<String, usize>>>,
}

impl RunShared {
    fn record(&self, node: &str, rows: usize) {
        self.rows.lock().insert(node.to_string(), rows);
        self.events.try_emit(
            "dataflow.stage.finished",
            Some(json!({"node": node, "rows": rows})),
        );
    }
}

/// Runs every stage as its own task, connected by bounded channels.
///
/// A producer blocks until its consumer has room, so memory stays bounded by
/// the channel capacity. Pipes whose consumers have exactly one producer are
/// plain channels; every other pipe goes through a [`MergeTask`]. The first
/// failing task cancels the whole run: its siblings stop, release their
/// adapters, and the first real error is returned.
pub struct ParallelRunner {
    channel_capacity: usize,
    events: SharedEventSink,
    cancel_token: Arc<CancellationToken>,
}

impl ParallelRunner {
    /// Creates a runner with one-row channels.
    #[must_use]
    pub fn new() -> Self {
        Self {
            channel_capacity: 1,
            events: noop_sink(),
            cancel_token: Arc::new(CancellationToken::new()),
        }
    }

    /// Sets the capacity of every channel. Clamped to at least one.
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: SharedEventSink) -> Self {
        self.events = events;
        self
    }

    /// Uses `token` to stop runs from outside.
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

    /// Creates the channels and merge tasks for `graph`.
    fn wire(&self, graph: &GraphDescriptor) -> Wiring {
        let stages = graph.stages();
        let index: HashMap<&str, usize> = stages
            .iter()
            .enumerate()
            .map(|(i, stage)| (stage.name(), i))
            .collect();

        let mut groups: Vec<ConsumerGroup> = Vec::new();
        let mut group_by_producers: BTreeMap<Vec<usize>, usize> = BTreeMap::new();
        let mut group_of = vec![usize::MAX; stages.len()];
        for (consumer, stage) in stages.iter().enumerate() {
            let mut producers: Vec<usize> = graph
                .upstream_of(stage.name())
                .into_iter()
                .filter_map(|name| index.get(name).copied())
                .collect();
            if producers.is_empty() {
                continue;
            }
            producers.sort_unstable();
            let group = *group_by_producers.entry(producers.clone()).or_insert_with(|| {
                groups.push(ConsumerGroup {
                    producers,
                    consumers: Vec::new(),
                });
                groups.len() - 1
            });
            groups[group].consumers.push(consumer);
            group_of[consumer] = group;
        }

        let mut inboxes: Vec<Option<Receiver<Row>>> = stages.iter().map(|_| None).collect();
        let mut group_inputs: Vec<HashMap<usize, Sender<Row>>> = Vec::with_capacity(groups.len());
        let mut merges = Vec::new();
        for group in &groups {
            let mut inputs = HashMap::new();
            let edge = (group.producers.as_slice(), group.consumers.as_slice());
            if let ([producer], [consumer]) = edge {
                let (tx, rx) = mpsc::channel(self.channel_capacity);
                inputs.insert(*producer, tx);
                inboxes[*consumer] = Some(rx);
            } else {
                let mut merge_inputs = Vec::with_capacity(group.producers.len());
                for producer in &group.producers {
                    let (tx, rx) = mpsc::channel(self.channel_capacity);
                    inputs.insert(*producer, tx);
                    merge_inputs.push(rx);
                }
                let mut merge_outputs = Vec::with_capacity(group.consumers.len());
                for consumer in &group.consumers {
                    let (tx, rx) = mpsc::channel(self.channel_capacity);
                    merge_outputs.push(tx);
                    inboxes[*consumer] = Some(rx);
                }
                let label = format!(
                    "{}->{}",
                    names(stages.iter().map(|s| s.name()), &group.producers),
                    names(stages.iter().map(|s| s.name()), &group.consumers)
                );
                merges.push(MergeTask::new(label, merge_inputs, merge_outputs));
            }
            group_inputs.push(inputs);
        }

        let outboxes = stages
            .iter()
            .enumerate()
            .map(|(producer, stage)| {
                let mut senders = Vec::new();
                for consumer in graph.downstream_of(stage.name()) {
                    let Some(&consumer) = index.get(consumer.as_str()) else {
                        continue;
                    };
                    if let Some(tx) = group_inputs
                        .get_mut(group_of[consumer])
                        .and_then(|inputs| inputs.remove(&producer))
                    {
                        senders.push(tx);
                    }
                }
                senders
            })
            .collect();

        Wiring {
            inboxes,
            outboxes,
            merges,
        }
    }

    async fn execute(
        &self,
        graph: GraphDescriptor,
        shared: RunShared,
    ) -> Result<(), DuctworkError> {
        let Wiring {
            mut inboxes,
            mut outboxes,
            merges,
        } = self.wire(&graph);
        let mut group = TaskGroup::with_token(shared.token.clone());

        for merge in merges {
            let token = shared.token.clone();
            let events = shared.events.clone();
            group.spawn(format!("merge:{}", merge.label()), async move {
                let label = merge.label().to_string();
                let merged = merge.run(&token).await?;
                events.try_emit("merge.finished", Some(json!({"merge": label, "rows": merged})));
                Ok(())
            });
        }

        let (_, stages, _) = graph.into_parts();
        for (idx, stage) in stages.into_iter().enumerate() {
            let (name, body, adapter, options) = stage.into_parts();
            let scope = adapter.map_or_else(AdapterScope::unbound, |binding| {
                AdapterScope::bound(binding.name, binding.adapter)
            });
            let ctx = StageContext::new(name.clone(), options, scope);
            let outputs = std::mem::take(&mut outboxes[idx]);
            let inbox = inboxes[idx].take();
            let shared = shared.clone();

            group.spawn(format!("stage:{name}"), async move {
                run_stage(name, body, ctx, inbox, outputs, shared).await
            });
        }

        group.wait().await
    }
}

fn names<'a>(all: impl Iterator<Item = &'a str>, picked: &[usize]) -> String {
    let all: Vec<&str> = all.collect();
    picked
        .iter()
        .filter_map(|&i| all.get(i).copied())
        .collect::<Vec<_>>()
        .join("+")
}

/// Runs one stage task, always releasing its adapter.
///
/// A failure or panic cancels the run before the outputs close.
async fn run_stage(
    name: String,
    body: StageBody,
    mut ctx: StageContext,
    inbox: Option<Receiver<Row>>,
    outputs: Vec<Sender<Row>>,
    shared: RunShared,
) -> Result<(), DuctworkError> {
    let token = shared.token.clone();
    let work = async {
        ctx.open_adapter()
            .await
            .map_err(|e| DuctworkError::stage(name.clone(), e.into()))?;
        match (body, inbox) {
            (StageBody::Source(source), _) => {
                run_source(&name, source, &mut ctx, &outputs, &token).await
            }
            (StageBody::Transform(transform), Some(inbox)) => {
                run_transform(&name, transform, &mut ctx, inbox, &outputs, &token).await
            }
            (StageBody::Destination(destination), Some(inbox)) => {
                run_destination(&name, destination, &mut ctx, inbox, &token).await
            }
            (body, None) => Err(DuctworkError::stage(
                name.clone(),
                StageError::contract(format!("{} stage has no upstream", body.kind())),
            )),
        }
    };
    let result = match AssertUnwindSafe(work).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(DuctworkError::Internal(format!(
            "Stage '{name}' panicked: {}",
            panic_message(panic.as_ref())
        ))),
    };
    if let Err(e) = &result {
        if !e.is_cancellation() {
            // Consumers must not mistake a failed producer for end of stream.
            token.cancel(format!("stage:{name} failed: {e}"));
        }
    }
    // Closing the outputs signals end of stream downstream.
    drop(outputs);

    let released = ctx.release_adapter().await;
    match (result, released) {
        (Ok(rows), Ok(())) => {
            debug!(node = %name, rows, "Stage finished");
            shared.record(&name, rows);
            Ok(())
        }
        (Ok(_), Err(e)) => Err(DuctworkError::stage(name, e.into())),
        (Err(e), released) => {
            if let Err(close_error) = released {
                warn!(node = %name, error = %close_error, "Failed to release adapter");
            }
            Err(e)
        }
    }
}

async fn run_source(
    name: &str,
    mut source: Box<dyn Source>,
    ctx: &mut StageContext,
    outputs: &[Sender<Row>],
    token: &CancellationToken,
) -> Result<usize, DuctworkError> {
    let mut rows = 0;
    loop {
        if token.is_cancelled() {
            return Err(DuctworkError::Cancelled(token.reason().unwrap_or_default()));
        }
        let next = source
            .next_row(ctx)
            .await
            .map_err(|e| DuctworkError::stage(name, e))?;
        let Some(row) = next else {
            return Ok(rows);
        };
        rows += 1;
        forward(outputs, row, token).await?;
    }
}

async fn run_transform(
    name: &str,
    mut transform: Box<dyn Transform>,
    ctx: &mut StageContext,
    mut inbox: Receiver<Row>,
    outputs: &[Sender<Row>],
    token: &CancellationToken,
) -> Result<usize, DuctworkError> {
    let mut rows = 0;
    while let Some(row) = receive(&mut inbox, token).await? {
        rows += 1;
        let mut out = Emitter::new();
        transform
            .process(row, ctx, &mut out)
            .await
            .map_err(|e| DuctworkError::stage(name, e))?;
        for row in out.into_rows() {
            forward(outputs, row, token).await?;
        }
    }

    let mut out = Emitter::new();
    transform
        .close(ctx, &mut out)
        .await
        .map_err(|e| DuctworkError::stage(name, e))?;
    for row in out.into_rows() {
        forward(outputs, row, token).await?;
    }
    Ok(rows)
}

async fn run_destination(
    name: &str,
    mut destination: Box<dyn Destination>,
    ctx: &mut StageContext,
    mut inbox: Receiver<Row>,
    token: &CancellationToken,
) -> Result<usize, DuctworkError> {
    let mut rows = 0;
    while let Some(row) = receive(&mut inbox, token).await? {
        rows += 1;
        destination
            .write(row, ctx)
            .await
            .map_err(|e| DuctworkError::stage(name, e))?;
    }
    destination
        .close(ctx)
        .await
        .map_err(|e| DuctworkError::stage(name, e))?;
    Ok(rows)
}

impl Default for ParallelRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ParallelRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelRunner")
            .field("channel_capacity", &self.channel_capacity)
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish()
    }
}

#[async_trait]
impl DataflowRunner for ParallelRunner {
    async fn run(&self, graph: GraphDescriptor) -> Result<DataflowReport, DuctworkError> {
        let timer = SpanTimer::start("dataflow.parallel");
        let graph_name = graph.name().to_string();
        info!(graph = %graph_name, stages = graph.stages().len(), "Starting parallel dataflow");
        self.events.try_emit(
            "dataflow.started",
            Some(json!({"graph": graph_name, "runner": "parallel"})),
        );

        // A per-run token, so one failed run does not poison the runner.
        let shared = RunShared {
            token: Arc::new(CancellationToken::new()),
            events: self.events.clone(),
            rows: Arc::new(Mutex::new(HashMap::new())),
        };
        if self.cancel_token.is_cancelled() {
            shared
                .token
                .cancel(self.cancel_token.reason().unwrap_or_default());
        }
        let link = {
            let external = self.cancel_token.clone();
            let run = shared.token.clone();
            tokio::spawn(async move {
                external.cancelled().await;
                run.cancel(external.reason().unwrap_or_default());
            })
        };

        let result = self.execute(graph, shared.clone()).await;
        link.abort();

        let duration_ms = timer.finish();
        match result {
            Ok(()) => {
                info!(graph = %graph_name, duration_ms, "Dataflow completed");
                self.events.try_emit(
                    "dataflow.completed",
                    Some(json!({"graph": graph_name, "duration_ms": duration_ms})),
                );
                let rows = std::mem::take(&mut *shared.rows.lock());
                Ok(DataflowReport {
                    graph: graph_name,
                    rows,
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
    use crate::testing::Recorder;
    use pretty_assertions::assert_eq;

    fn numbers(n: i64) -> IterSource<std::vec::IntoIter<Row>> {
        IterSource::new((1..=n).map(|i| json!(i)).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn test_linear_pipeline_keeps_order() {
        let log = Recorder::new();
        let graph = GraphBuilder::new("linear")
            .source("numbers", numbers(50))
            .transform(
                "inc",
                FnTransform::new(|row: Row, out: &mut Emitter| {
                    out.emit(json!(row.as_i64().unwrap_or_default() + 1));
                    Ok(())
                }),
            )
            .destination("out", log.destination("out"))
            .send_to("numbers", &["inc"])
            .send_to("inc", &["out"])
            .build()
            .unwrap();

        let report = ParallelRunner::new().run(graph).await.unwrap();

        let expected: Vec<Row> = (2..=51).map(|i| json!(i)).collect();
        assert_eq!(log.rows("out"), expected);
        assert_eq!(log.closes("out"), 1);
        assert_eq!(report.rows_for("numbers"), 50);
        assert_eq!(report.rows_for("out"), 50);
    }

    #[tokio::test]
    async fn test_fan_out_through_merge_task() {
        let log = Recorder::new();
        let graph = GraphBuilder::new("fan-out")
            .source("numbers", numbers(5))
            .destination("a", log.destination("a"))
            .destination("b", log.destination("b"))
            .send_to("numbers", &["a", "b"])
            .build()
            .unwrap();

        let runner = ParallelRunner::new();
        let wiring = runner.wire(&graph);
        assert_eq!(wiring.merges.len(), 1);
        drop(wiring);

        runner.run(graph).await.unwrap();
        assert_eq!(log.rows("a").len(), 5);
        assert_eq!(log.rows("b"), log.rows("a"));
    }

    #[tokio::test]
    async fn test_single_edges_use_direct_channels() {
        let log = Recorder::new();
        let graph = GraphBuilder::new("direct")
            .source("numbers", numbers(1))
            .destination("out", log.destination("out"))
            .send_to("numbers", &["out"])
            .build()
            .unwrap();

        let wiring = ParallelRunner::new().wire(&graph);
        assert!(wiring.merges.is_empty());
        assert_eq!(wiring.outboxes[0].len(), 1);
        assert!(wiring.inboxes[1].is_some());
    }
}
