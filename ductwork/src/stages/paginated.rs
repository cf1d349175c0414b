//! Offset-based paging with a consistency check.

use super::{Source, StageContext};
use crate::core::Row;
use crate::errors::{InconsistentPaginationError, StageError};
use async_trait::async_trait;
use std::collections::VecDeque;
use tracing::debug;

/// Position of a paginated source.
///
/// The offset grows by exactly `page_size` per full page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    offset: usize,
    page_size: usize,
}

impl PageCursor {
    /// A cursor at offset zero. The page size is at least one.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            offset: 0,
            page_size: page_size.max(1),
        }
    }

    /// Returns the offset of the next page.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Returns the page size (the query limit).
    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// Moves to the next page.
    pub fn advance(&mut self) {
        self.offset += self.page_size;
    }
}

/// Fetches one page of rows at a cursor.
#[async_trait]
pub trait PageFetcher: Send {
    /// Returns at most `cursor.page_size()` rows starting at `cursor.offset()`.
    async fn fetch_page(
        &mut self,
        ctx: &mut StageContext,
        cursor: PageCursor,
    ) -> Result<Vec<Row>, StageError>;
}

/// A source that reads its rows page by page.
///
/// Paging continues while a page returns exactly `page_size` rows and stops
/// on the first shorter page. A page with more rows than requested fails
/// with [`InconsistentPaginationError`].
pub struct PaginatedSource<F> {
    fetcher: F,
    cursor: Option<PageCursor>,
    page_size_override: Option<usize>,
    pending: VecDeque<Row>,
    exhausted: bool,
    fetches: usize,
}

impl<F: PageFetcher> PaginatedSource<F> {
    /// Wraps a page fetcher.
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            cursor: None,
            page_size_override: None,
            pending: VecDeque::new(),
            exhausted: false,
            fetches: 0,
        }
    }

    /// Overrides the `page_size` stage option.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size_override = Some(page_size);
        self
    }

    /// Returns the number of pages fetched so far.
    #[must_use]
    pub const fn fetches(&self) -> usize {
        self.fetches
    }

    /// Returns the current cursor, once paging has started.
    #[must_use]
    pub const fn cursor(&self) -> Option<PageCursor> {
        self.cursor
    }

    async fn fetch_next_page(&mut self, ctx: &mut StageContext) -> Result<(), StageError> {
        let page_size = self
            .page_size_override
            .unwrap_or_else(|| ctx.options().page_size());
        let cursor = *self.cursor.get_or_insert_with(|| PageCursor::new(page_size));

        let rows = self.fetcher.fetch_page(ctx, cursor).await?;
        self.fetches += 1;
        debug!(
            node = %ctx.node(),
            offset = cursor.offset(),
            rows = rows.len(),
            "Fetched page"
        );

        let page_size = cursor.page_size();
        if rows.len() > page_size {
            return Err(InconsistentPaginationError::new(rows.len(), page_size).into());
        }
        if rows.len() == page_size {
            if let Some(cursor) = self.cursor.as_mut() {
                cursor.advance();
            }
        } else {
            self.exhausted = true;
        }
        self.pending.extend(rows);
        Ok(())
    }
}

#[async_trait]
impl<F: PageFetcher> Source for PaginatedSource<F> {
    async fn next_row(&mut self, ctx: &mut StageContext) -> Result<Option<Row>, StageError> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fetch_next_page(ctx).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::StageOptions;
    use crate::testing::VecPageFetcher;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn drain<F: PageFetcher>(
        source: &mut PaginatedSource<F>,
        ctx: &mut StageContext,
    ) -> Result<Vec<Row>, StageError> {
        let mut rows = Vec::new();
        while let Some(row) = source.next_row(ctx).await? {
            rows.push(row);
        }
        Ok(rows)
    }

    fn numbers(total: i64) -> Vec<Row> {
        (0..total).map(|n| json!(n)).collect()
    }

    #[test]
    fn test_cursor_advances_by_page_size() {
        let mut cursor = PageCursor::new(3);
        cursor.advance();
        cursor.advance();
        assert_eq!(cursor.offset(), 6);
        assert_eq!(PageCursor::new(0).page_size(), 1);
    }

    #[tokio::test]
    async fn test_partial_last_page_stops() {
        let fetcher = VecPageFetcher::new(numbers(5));
        let offsets = fetcher.offsets();
        let mut source = PaginatedSource::new(fetcher);
        let mut ctx = StageContext::detached("pages", StageOptions::new().with("page_size", 2));

        let rows = drain(&mut source, &mut ctx).await.unwrap();

        assert_eq!(rows, numbers(5));
        assert_eq!(source.fetches(), 3);
        assert_eq!(*offsets.lock(), vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn test_exact_multiple_fetches_trailing_empty_page() {
        let fetcher = VecPageFetcher::new(numbers(4));
        let mut source = PaginatedSource::new(fetcher).with_page_size(2);
        let mut ctx = StageContext::detached("pages", StageOptions::new());

        let rows = drain(&mut source, &mut ctx).await.unwrap();

        assert_eq!(rows.len(), 4);
        assert_eq!(source.fetches(), 3);
        assert_eq!(source.cursor().map(|c| c.offset()), Some(4));
    }

    #[tokio::test]
    async fn test_empty_source_fetches_once() {
        let mut source = PaginatedSource::new(VecPageFetcher::new(Vec::new())).with_page_size(10);
        let mut ctx = StageContext::detached("pages", StageOptions::new());

        assert!(drain(&mut source, &mut ctx).await.unwrap().is_empty());
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn test_oversized_page_is_inconsistent() {
        let fetcher = VecPageFetcher::new(numbers(10)).with_overflow(1);
        let mut source = PaginatedSource::new(fetcher).with_page_size(3);
        let mut ctx = StageContext::detached("pages", StageOptions::new());

        let err = drain(&mut source, &mut ctx).await.unwrap_err();
        match err {
            StageError::InconsistentPagination(e) => {
                assert_eq!(e, InconsistentPaginationError::new(4, 3));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
