//! Mock stages for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

use crate::core::{Emitter, Row};
use crate::errors::StageError;
use crate::stages::{
    Destination, FlushDestination, FlushTransform, PageCursor, PageFetcher, Source,
    StageContext, Transform,
};

#[derive(Debug, Clone)]
enum Entry {
    Row(Row),
    Close,
}

/// A shared log of what recording destinations received, across nodes.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    entries: Arc<Mutex<Vec<(String, Entry)>>>,
}

impl Recorder {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a destination logging under `node`.
    #[must_use]
    pub fn destination(&self, node: impl Into<String>) -> RecordingDestination {
        RecordingDestination {
            node: node.into(),
            recorder: self.clone(),
        }
    }

    /// Returns every entry as `node:row` or `node:close`, in arrival order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .map(|(node, entry)| match entry {
                Entry::Row(row) => format!("{node}:{row}"),
                Entry::Close => format!("{node}:close"),
            })
            .collect()
    }

    /// Returns the rows `node` received, in order.
    #[must_use]
    pub fn rows(&self, node: &str) -> Vec<Row> {
        self.entries
            .lock()
            .iter()
            .filter(|(n, _)| n == node)
            .filter_map(|(_, entry)| match entry {
                Entry::Row(row) => Some(row.clone()),
                Entry::Close => None,
            })
            .collect()
    }

    /// Returns how many times `node` was closed.
    #[must_use]
    pub fn closes(&self, node: &str) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|(n, entry)| n == node && matches!(entry, Entry::Close))
            .count()
    }

    fn push(&self, node: &str, entry: Entry) {
        self.entries.lock().push((node.to_string(), entry));
    }
}

/// A destination logging rows and closes into a [`Recorder`].
#[derive(Debug)]
pub struct RecordingDestination {
    node: String,
    recorder: Recorder,
}

#[async_trait]
impl Destination for RecordingDestination {
    async fn write(&mut self, row: Row, _ctx: &mut StageContext) -> Result<(), StageError> {
        self.recorder.push(&self.node, Entry::Row(row));
        Ok(())
    }

    async fn close(&mut self, _ctx: &mut StageContext) -> Result<(), StageError> {
        self.recorder.push(&self.node, Entry::Close);
        Ok(())
    }
}

/// A transform forwarding every row unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

#[async_trait]
impl Transform for PassThrough {
    async fn process(
        &mut self,
        row: Row,
        _ctx: &mut StageContext,
        out: &mut Emitter,
    ) -> Result<(), StageError> {
        out.emit(row);
        Ok(())
    }
}

/// A transform failing on its n-th row (1-based), forwarding the rows before.
#[derive(Debug, Clone)]
pub struct FailingTransform {
    fail_on: usize,
    seen: usize,
}

impl FailingTransform {
    /// Fails on the `fail_on`-th row.
    #[must_use]
    pub const fn on_row(fail_on: usize) -> Self {
        Self { fail_on, seen: 0 }
    }
}

#[async_trait]
impl Transform for FailingTransform {
    async fn process(
        &mut self,
        row: Row,
        _ctx: &mut StageContext,
        out: &mut Emitter,
    ) -> Result<(), StageError> {
        self.seen += 1;
        if self.seen == self.fail_on {
            return Err(StageError::msg(format!("boom at row {}", self.seen)));
        }
        out.emit(row);
        Ok(())
    }
}

/// A source emitting `rows` rows, then failing.
#[derive(Debug, Clone)]
pub struct FailingSource {
    rows: usize,
    emitted: usize,
}

impl FailingSource {
    /// Emits `rows` rows before failing.
    #[must_use]
    pub const fn after(rows: usize) -> Self {
        Self { rows, emitted: 0 }
    }
}

#[async_trait]
impl Source for FailingSource {
    async fn next_row(&mut self, _ctx: &mut StageContext) -> Result<Option<Row>, StageError> {
        if self.emitted == self.rows {
            return Err(StageError::msg("source connection lost"));
        }
        self.emitted += 1;
        Ok(Some(json!(self.emitted)))
    }
}

/// A source that never ends on its own.
#[derive(Debug, Clone, Default)]
pub struct EndlessSource {
    next: u64,
}

impl EndlessSource {
    /// Creates an endless counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Source for EndlessSource {
    async fn next_row(&mut self, _ctx: &mut StageContext) -> Result<Option<Row>, StageError> {
        self.next += 1;
        tokio::task::yield_now().await;
        Ok(Some(json!(self.next)))
    }
}

/// Flush callback recording every batch; as a transform it forwards the batch.
#[derive(Debug, Clone, Default)]
pub struct RecordingFlush {
    batches: Arc<Mutex<Vec<Vec<Row>>>>,
}

impl RecordingFlush {
    /// Creates a recorder with no batches.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared batch log.
    #[must_use]
    pub fn batches(&self) -> Arc<Mutex<Vec<Vec<Row>>>> {
        self.batches.clone()
    }
}

#[async_trait]
impl FlushTransform for RecordingFlush {
    async fn on_flush(
        &mut self,
        batch: Vec<Row>,
        _ctx: &mut StageContext,
        out: &mut Emitter,
    ) -> Result<(), StageError> {
        self.batches.lock().push(batch.clone());
        out.emit_all(batch);
        Ok(())
    }
}

#[async_trait]
impl FlushDestination for RecordingFlush {
    async fn on_flush(
        &mut self,
        batch: Vec<Row>,
        _ctx: &mut StageContext,
    ) -> Result<(), StageError> {
        self.batches.lock().push(batch);
        Ok(())
    }
}

/// Serves pages out of an in-memory table and records requested offsets.
#[derive(Debug, Clone)]
pub struct VecPageFetcher {
    rows: Vec<Row>,
    overflow: usize,
    offsets: Arc<Mutex<Vec<usize>>>,
}

impl VecPageFetcher {
    /// Creates a fetcher over `rows`.
    #[must_use]
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            overflow: 0,
            offsets: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Makes every page return up to `extra` rows more than requested.
    #[must_use]
    pub fn with_overflow(mut self, extra: usize) -> Self {
        self.overflow = extra;
        self
    }

    /// Returns the shared log of requested offsets.
    #[must_use]
    pub fn offsets(&self) -> Arc<Mutex<Vec<usize>>> {
        self.offsets.clone()
    }
}

#[async_trait]
impl PageFetcher for VecPageFetcher {
    async fn fetch_page(
        &mut self,
        _ctx: &mut StageContext,
        cursor: PageCursor,
    ) -> Result<Vec<Row>, StageError> {
        self.offsets.lock().push(cursor.offset());
        let start = cursor.offset().min(self.rows.len());
        let end = (cursor.offset() + cursor.page_size() + self.overflow).min(self.rows.len());
        Ok(self.rows[start..end].to_vec())
    }
}
