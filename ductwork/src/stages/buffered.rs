//! Batch accumulation with threshold flush.
//!
//! A buffered stage appends every row to its [`Buffer`]. When the buffer
//! reaches `buffer_size` rows it is handed to the flush callback and cleared;
//! at end of stream any non-empty remainder is flushed once more.

use super::{Destination, StageContext, Transform};
use crate::core::{Emitter, Row};
use crate::errors::StageError;
use async_trait::async_trait;
use tracing::trace;

/// An ordered batch of rows bounded by a capacity.
#[derive(Debug, Clone)]
pub struct Buffer {
    rows: Vec<Row>,
    capacity: usize,
}

impl Buffer {
    /// Creates an empty buffer. The capacity is at least one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            rows: Vec::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Appends a row. Returns true when the buffer is now full.
    pub fn push(&mut self, row: Row) -> bool {
        self.rows.push(row);
        self.rows.len() >= self.capacity
    }

    /// Removes and returns every buffered row.
    pub fn take(&mut self) -> Vec<Row> {
        std::mem::take(&mut self.rows)
    }

    /// Returns the configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of buffered rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Flush callback of a [`BufferedTransform`].
#[async_trait]
pub trait FlushTransform: Send {
    /// Handles one full (or final) batch, emitting any output rows.
    async fn on_flush(
        &mut self,
        batch: Vec<Row>,
        ctx: &mut StageContext,
        out: &mut Emitter,
    ) -> Result<(), StageError>;
}

/// Flush callback of a [`BufferedDestination`].
#[async_trait]
pub trait FlushDestination: Send {
    /// Writes one full (or final) batch.
    async fn on_flush(&mut self, batch: Vec<Row>, ctx: &mut StageContext) -> Result<(), StageError>;
}

/// Shared buffering state of the buffered stages.
#[derive(Debug, Default)]
struct BufferState {
    buffer: Option<Buffer>,
    size_override: Option<usize>,
    flushes: usize,
}

impl BufferState {
    /// Buffers a row; returns a batch when the threshold is reached.
    fn push(&mut self, row: Row, ctx: &StageContext) -> Option<Vec<Row>> {
        let size = self
            .size_override
            .unwrap_or_else(|| ctx.options().buffer_size());
        let buffer = self.buffer.get_or_insert_with(|| Buffer::new(size));
        if buffer.push(row) {
            self.flushes += 1;
            trace!(node = %ctx.node(), batch = buffer.len(), "Buffer full, flushing");
            Some(buffer.take())
        } else {
            None
        }
    }

    /// Returns the non-empty remainder at end of stream.
    fn remainder(&mut self) -> Option<Vec<Row>> {
        let rows = self.buffer.as_mut().map(Buffer::take).unwrap_or_default();
        if rows.is_empty() {
            None
        } else {
            self.flushes += 1;
            Some(rows)
        }
    }
}

/// A transform that processes rows in batches.
///
/// The buffer size comes from the stage's `buffer_size` option unless set
/// with [`BufferedTransform::with_buffer_size`].
pub struct BufferedTransform<F> {
    inner: F,
    state: BufferState,
}

impl<F: FlushTransform> BufferedTransform<F> {
    /// Wraps a flush callback.
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            state: BufferState::default(),
        }
    }

    /// Overrides the buffer size.
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.state.size_override = Some(size.max(1));
        self
    }

    /// Returns the number of flushes performed so far.
    #[must_use]
    pub const fn flushes(&self) -> usize {
        self.state.flushes
    }

    /// Returns the wrapped callback.
    pub const fn inner(&self) -> &F {
        &self.inner
    }
}

#[async_trait]
impl<F: FlushTransform> Transform for BufferedTransform<F> {
    async fn process(
        &mut self,
        row: Row,
        ctx: &mut StageContext,
        out: &mut Emitter,
    ) -> Result<(), StageError> {
        if let Some(batch) = self.state.push(row, ctx) {
            self.inner.on_flush(batch, ctx, out).await?;
        }
        Ok(())
    }

    async fn close(&mut self, ctx: &mut StageContext, out: &mut Emitter) -> Result<(), StageError> {
        if let Some(batch) = self.state.remainder() {
            self.inner.on_flush(batch, ctx, out).await?;
        }
        Ok(())
    }
}

/// A destination that writes rows in batches.
pub struct BufferedDestination<F> {
    inner: F,
    state: BufferState,
}

impl<F: FlushDestination> BufferedDestination<F> {
    /// Wraps a flush callback.
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            state: BufferState::default(),
        }
    }

    /// Overrides the buffer size.
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.state.size_override = Some(size.max(1));
        self
    }

    /// Returns the number of flushes performed so far.
    #[must_use]
    pub const fn flushes(&self) -> usize {
        self.state.flushes
    }
}

#[async_trait]
impl<F: FlushDestination> Destination for BufferedDestination<F> {
    async fn write(&mut self, row: Row, ctx: &mut StageContext) -> Result<(), StageError> {
        if let Some(batch) = self.state.push(row, ctx) {
            self.inner.on_flush(batch, ctx).await?;
        }
        Ok(())
    }

    async fn close(&mut self, ctx: &mut StageContext) -> Result<(), StageError> {
        if let Some(batch) = self.state.remainder() {
            self.inner.on_flush(batch, ctx).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::StageOptions;
    use crate::testing::RecordingFlush;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_buffer_reports_full_at_capacity() {
        let mut buffer = Buffer::new(2);
        assert!(!buffer.push(json!(1)));
        assert!(buffer.push(json!(2)));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.take(), vec![json!(1), json!(2)]);
        assert!(buffer.is_empty());
        assert_eq!(Buffer::new(0).capacity(), 1);
    }

    #[tokio::test]
    async fn test_flush_batches_follow_buffer_size() {
        let flush = RecordingFlush::new();
        let batches = flush.batches();
        let mut stage = BufferedTransform::new(flush);
        let mut ctx = StageContext::detached("batch", StageOptions::new().with("buffer_size", 2));
        let mut out = Emitter::new();

        for n in 1..=5 {
            stage.process(json!(n), &mut ctx, &mut out).await.unwrap();
        }
        assert_eq!(stage.flushes(), 2);
        stage.close(&mut ctx, &mut out).await.unwrap();

        assert_eq!(stage.flushes(), 3);
        assert_eq!(
            *batches.lock(),
            vec![
                vec![json!(1), json!(2)],
                vec![json!(3), json!(4)],
                vec![json!(5)],
            ]
        );
        assert_eq!(out.len(), 5);
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_empty_trailing_flush() {
        let flush = RecordingFlush::new();
        let batches = flush.batches();
        let mut stage = BufferedTransform::new(flush).with_buffer_size(3);
        let mut ctx = StageContext::detached("batch", StageOptions::new());
        let mut out = Emitter::new();

        for n in 0..6 {
            stage.process(json!(n), &mut ctx, &mut out).await.unwrap();
        }
        stage.close(&mut ctx, &mut out).await.unwrap();

        assert_eq!(stage.flushes(), 2);
        assert!(batches.lock().iter().all(|batch| batch.len() == 3));
    }

    #[tokio::test]
    async fn test_buffered_destination_flushes_remainder() {
        let flush = RecordingFlush::new();
        let batches = flush.batches();
        let mut stage = BufferedDestination::new(flush).with_buffer_size(4);
        let mut ctx = StageContext::detached("sink", StageOptions::new());

        for n in 0..10 {
            stage.write(json!(n), &mut ctx).await.unwrap();
        }
        stage.close(&mut ctx).await.unwrap();

        let sizes: Vec<usize> = batches.lock().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(stage.flushes(), 3);
    }

    #[tokio::test]
    async fn test_empty_stream_never_flushes() {
        let flush = RecordingFlush::new();
        let batches = flush.batches();
        let mut stage = BufferedDestination::new(flush);
        let mut ctx = StageContext::detached("sink", StageOptions::new());

        stage.close(&mut ctx).await.unwrap();
        assert!(batches.lock().is_empty());
        assert_eq!(stage.flushes(), 0);
    }
}
