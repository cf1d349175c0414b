//! Closure and iterator backed stages.

use super::{Destination, Source, StageContext, Transform};
use crate::core::{Emitter, Row};
use crate::errors::StageError;
use async_trait::async_trait;

/// A source yielding the rows of an iterator.
pub struct IterSource<I> {
    rows: I,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = Row> + Send,
{
    /// Creates a source over anything iterable.
    pub fn new(rows: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

#[async_trait]
impl<I> Source for IterSource<I>
where
    I: Iterator<Item = Row> + Send,
{
    async fn next_row(&mut self, _ctx: &mut StageContext) -> Result<Option<Row>, StageError> {
        Ok(self.rows.next())
    }
}

/// A transform backed by a closure.
pub struct FnTransform<F> {
    func: F,
}

impl<F> FnTransform<F>
where
    F: FnMut(Row, &mut Emitter) -> Result<(), StageError> + Send,
{
    /// Creates a function-based transform.
    pub const fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> Transform for FnTransform<F>
where
    F: FnMut(Row, &mut Emitter) -> Result<(), StageError> + Send,
{
    async fn process(
        &mut self,
        row: Row,
        _ctx: &mut StageContext,
        out: &mut Emitter,
    ) -> Result<(), StageError> {
        (self.func)(row, out)
    }
}

/// A destination backed by a closure.
pub struct FnDestination<F> {
    func: F,
}

impl<F> FnDestination<F>
where
    F: FnMut(Row) -> Result<(), StageError> + Send,
{
    /// Creates a function-based destination.
    pub const fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> Destination for FnDestination<F>
where
    F: FnMut(Row) -> Result<(), StageError> + Send,
{
    async fn write(&mut self, row: Row, _ctx: &mut StageContext) -> Result<(), StageError> {
        (self.func)(row)
    }
}
