//! Channel plumbing shared by parallel stage tasks and merge tasks.
//!
//! Closing a channel is how end of stream travels: a task drops its senders
//! once it has nothing more to send.

use crate::cancellation::CancellationToken;
use crate::core::Row;
use crate::errors::DuctworkError;
use tokio::sync::mpsc::{Receiver, Sender};

fn cancelled(token: &CancellationToken) -> DuctworkError {
    DuctworkError::Cancelled(token.reason().unwrap_or_else(|| "dataflow stopped".to_string()))
}

/// Sends `row` to every output in order, waiting for each to accept it.
///
/// Fails with a cancellation when the token fires or an output has hung up,
/// which only happens when the consumer stopped on an error of its own.
pub(crate) async fn forward(
    outputs: &[Sender<Row>],
    row: Row,
    token: &CancellationToken,
) -> Result<(), DuctworkError> {
    let Some((last, rest)) = outputs.split_last() else {
        return Ok(());
    };
    for output in rest {
        send(output, row.clone(), token).await?;
    }
    send(last, row, token).await
}

async fn send(
    output: &Sender<Row>,
    row: Row,
    token: &CancellationToken,
) -> Result<(), DuctworkError> {
    tokio::select! {
        biased;
        () = token.cancelled() => Err(cancelled(token)),
        sent = output.send(row) => sent.map_err(|_| {
            DuctworkError::Cancelled("downstream stage stopped".to_string())
        }),
    }
}

/// Receives the next row, or `None` once every sender is gone.
///
/// Senders closed by a cancelled run are reported as a cancellation, never as
/// end of stream.
pub(crate) async fn receive(
    input: &mut Receiver<Row>,
    token: &CancellationToken,
) -> Result<Option<Row>, DuctworkError> {
    tokio::select! {
        biased;
        () = token.cancelled() => Err(cancelled(token)),
        row = input.recv() => match row {
            None if token.is_cancelled() => Err(cancelled(token)),
            row => Ok(row),
        },
    }
}
