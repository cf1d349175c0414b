//! Merge tasks joining several producers and consumers in the parallel runner.

use super::link::forward;
use crate::cancellation::CancellationToken;
use crate::core::Row;
use crate::errors::DuctworkError;
use futures::stream::{self, BoxStream, SelectAll, StreamExt};
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::debug;

/// Arbitrates a set of input channels onto a set of output channels.
///
/// Whichever input has a row ready is served next; rows from one input keep
/// their order, rows from different inputs interleave in no particular
/// order. Every row goes to every output. An input that closes leaves the
/// wait set; once all inputs are closed the outputs are closed too.
pub struct MergeTask {
    label: String,
    inputs: Vec<Receiver<Row>>,
    outputs: Vec<Sender<Row>>,
}

impl MergeTask {
    /// Creates a merge task.
    #[must_use]
    pub fn new(
        label: impl Into<String>,
        inputs: Vec<Receiver<Row>>,
        outputs: Vec<Sender<Row>>,
    ) -> Self {
        Self {
            label: label.into(),
            inputs,
            outputs,
        }
    }

    /// Returns the label used in logs.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Forwards rows until every input is closed. Returns the rows merged.
    pub async fn run(self, token: &CancellationToken) -> Result<usize, DuctworkError> {
        let Self {
            label,
            inputs,
            outputs,
        } = self;

        let mut ready: SelectAll<BoxStream<'static, Row>> = stream::select_all(
            inputs.into_iter().map(|input| {
                stream::unfold(input, |mut input| async move {
                    input.recv().await.map(|row| (row, input))
                })
                .boxed()
            }),
        );

        let mut merged = 0;
        loop {
            let next = tokio::select! {
                biased;
                () = token.cancelled() => {
                    return Err(DuctworkError::Cancelled(
                        token.reason().unwrap_or_else(|| "dataflow stopped".to_string()),
                    ));
                }
                next = ready.next() => next,
            };
            match next {
                Some(row) => {
                    merged += 1;
                    forward(&outputs, row, token).await?;
                }
                None => break,
            }
        }
        if token.is_cancelled() {
            return Err(DuctworkError::Cancelled(
                token.reason().unwrap_or_else(|| "dataflow stopped".to_string()),
            ));
        }

        debug!(merge = %label, rows = merged, "Merge inputs exhausted, closing outputs");
        drop(outputs);
        Ok(merged)
    }
}

impl std::fmt::Debug for MergeTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeTask")
            .field("label", &self.label)
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    async fn collect(mut rx: Receiver<Row>) -> Vec<Row> {
        let mut rows = Vec::new();
        while let Some(row) = rx.recv().await {
            rows.push(row);
        }
        rows
    }

    #[tokio::test]
    async fn test_two_producers_reach_every_output() {
        let token = Arc::new(CancellationToken::new());
        let (in_a, rx_a) = mpsc::channel(1);
        let (in_b, rx_b) = mpsc::channel(1);
        let (out_x, rx_x) = mpsc::channel(1);
        let (out_y, rx_y) = mpsc::channel(1);

        let merge = MergeTask::new("a+b", vec![rx_a, rx_b], vec![out_x, out_y]);
        assert_eq!(merge.label(), "a+b");
        let merge_token = token.clone();
        let merging = tokio::spawn(async move { merge.run(&merge_token).await });

        let producer = |tx: mpsc::Sender<Row>, tag: &'static str| async move {
            for n in 0..3 {
                tx.send(json!({"from": tag, "n": n})).await.unwrap();
            }
        };
        let collect_x = tokio::spawn(collect(rx_x));
        let collect_y = tokio::spawn(collect(rx_y));
        tokio::join!(producer(in_a, "a"), producer(in_b, "b"));

        assert_eq!(merging.await.unwrap().unwrap(), 6);
        let x = collect_x.await.unwrap();
        let y = collect_y.await.unwrap();
        assert_eq!(x.len(), 6);
        assert_eq!(y.len(), 6);

        for tag in ["a", "b"] {
            let order: Vec<i64> = x
                .iter()
                .filter(|row| row["from"] == tag)
                .filter_map(|row| row["n"].as_i64())
                .collect();
            assert_eq!(order, vec![0, 1, 2]);
        }
    }

    #[tokio::test]
    async fn test_no_inputs_closes_outputs_immediately() {
        let token = CancellationToken::new();
        let (out, rx) = mpsc::channel(1);
        let merged = MergeTask::new("empty", Vec::new(), vec![out])
            .run(&token)
            .await
            .unwrap();

        assert_eq!(merged, 0);
        assert!(collect(rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_stops_merge() {
        let token = CancellationToken::new();
        let (_in, rx) = mpsc::channel::<Row>(1);
        let (out, _out_rx) = mpsc::channel(1);
        token.cancel("stop");

        let err = MergeTask::new("stuck", vec![rx], vec![out])
            .run(&token)
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
    }
}
