//! Lookups: transforms enriching rows with data fetched from an adapter.

use super::{BufferedTransform, FlushTransform, StageContext, Transform};
use crate::core::{merge_rows, Emitter, Row};
use crate::errors::StageError;
use async_trait::async_trait;

/// Fetches the rows matching a set of keys.
#[async_trait]
pub trait LookupFetcher: Send {
    /// Returns the rows matching `keys`.
    async fn lookup(
        &mut self,
        ctx: &mut StageContext,
        keys: Vec<Row>,
    ) -> Result<Vec<Row>, StageError>;
}

/// A buffered lookup matching fetched rows back to the buffered rows.
///
/// Per flush, the values of `from_key` in the batch are looked up. Every
/// fetched row whose `to_key` equals a buffered row's `from_key` is emitted
/// merged with that buffered row (buffered values win). Unmatched fetched
/// rows are emitted unchanged.
pub struct MatchLookup<L> {
    fetcher: L,
    from_key: String,
    to_key: String,
}

impl<L: LookupFetcher> MatchLookup<L> {
    /// Creates a match lookup on `from_key` (batch side) and `to_key` (fetched side).
    pub fn new(fetcher: L, from_key: impl Into<String>, to_key: impl Into<String>) -> Self {
        Self {
            fetcher,
            from_key: from_key.into(),
            to_key: to_key.into(),
        }
    }

    /// Wraps the lookup in a [`BufferedTransform`].
    pub fn buffered(self) -> BufferedTransform<Self> {
        BufferedTransform::new(self)
    }

    fn find_match<'a>(&self, batch: &'a [Row], fetched: &Row) -> Option<&'a Row> {
        let wanted = fetched.get(&self.to_key)?;
        batch
            .iter()
            .find(|row| row.get(&self.from_key) == Some(wanted))
    }
}

#[async_trait]
impl<L: LookupFetcher> FlushTransform for MatchLookup<L> {
    async fn on_flush(
        &mut self,
        batch: Vec<Row>,
        ctx: &mut StageContext,
        out: &mut Emitter,
    ) -> Result<(), StageError> {
        let keys = batch
            .iter()
            .map(|row| row.get(&self.from_key).cloned().unwrap_or(Row::Null))
            .collect();
        let fetched = self.fetcher.lookup(ctx, keys).await?;

        for row in fetched {
            match self.find_match(&batch, &row) {
                Some(matched) => out.emit(merge_rows(row, matched)),
                None => out.emit(row),
            }
        }
        Ok(())
    }
}

/// A lookup querying once per row.
///
/// The row is merged with the first fetched match, or passed through when
/// nothing matches.
pub struct BasicLookup<L> {
    fetcher: L,
}

impl<L: LookupFetcher> BasicLookup<L> {
    /// Creates a per-row lookup.
    pub const fn new(fetcher: L) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl<L: LookupFetcher> Transform for BasicLookup<L> {
    async fn process(
        &mut self,
        row: Row,
        ctx: &mut StageContext,
        out: &mut Emitter,
    ) -> Result<(), StageError> {
        let matched = self.fetcher.lookup(ctx, vec![row.clone()]).await?;
        match matched.first() {
            Some(found) => out.emit(merge_rows(row, found)),
            None => out.emit(row),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::StageOptions;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    /// Looks keys up in a fixed table of `{"user_id", "email"}` rows.
    struct EmailTable {
        rows: Vec<Row>,
        calls: Vec<Vec<Row>>,
    }

    #[async_trait]
    impl LookupFetcher for EmailTable {
        async fn lookup(
            &mut self,
            _ctx: &mut StageContext,
            keys: Vec<Row>,
        ) -> Result<Vec<Row>, StageError> {
            let found = self
                .rows
                .iter()
                .filter(|row| {
                    keys.iter().any(|key| {
                        row.get("user_id") == Some(key) || row.get("user_id") == key.get("id")
                    })
                })
                .cloned()
                .collect();
            self.calls.push(keys);
            Ok(found)
        }
    }

    fn table() -> EmailTable {
        EmailTable {
            rows: vec![
                json!({"user_id": 1, "email": "a@example.com"}),
                json!({"user_id": 3, "email": "c@example.com"}),
            ],
            calls: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_match_lookup_merges_matches() {
        let mut lookup = MatchLookup::new(table(), "id", "user_id");
        let mut ctx = StageContext::detached("emails", StageOptions::new());
        let mut out = Emitter::new();

        let batch = vec![json!({"id": 1, "name": "ann"}), json!({"id": 2, "name": "bob"})];
        lookup.on_flush(batch, &mut ctx, &mut out).await.unwrap();

        assert_eq!(lookup.fetcher.calls, vec![vec![json!(1), json!(2)]]);
        assert_eq!(
            out.into_rows(),
            vec![json!({"user_id": 1, "email": "a@example.com", "id": 1, "name": "ann"})]
        );
    }

    #[tokio::test]
    async fn test_match_lookup_passes_unmatched_rows() {
        let mut fetcher = table();
        fetcher.rows.push(json!({"email": "orphan@example.com"}));
        let mut lookup = MatchLookup::new(fetcher, "id", "user_id");
        let mut ctx = StageContext::detached("emails", StageOptions::new());
        let mut out = Emitter::new();

        lookup
            .on_flush(vec![json!({"id": 3})], &mut ctx, &mut out)
            .await
            .unwrap();

        assert_eq!(
            out.into_rows(),
            vec![
                json!({"user_id": 3, "email": "c@example.com", "id": 3}),
                json!({"email": "orphan@example.com"}),
            ]
        );
    }

    #[tokio::test]
    async fn test_buffered_match_lookup_flushes_by_size() {
        let mut stage = MatchLookup::new(table(), "id", "user_id").buffered();
        let mut ctx = StageContext::detached("emails", StageOptions::new().with("buffer_size", 2));
        let mut out = Emitter::new();

        for id in 1..=3 {
            stage.process(json!({"id": id}), &mut ctx, &mut out).await.unwrap();
        }
        stage.close(&mut ctx, &mut out).await.unwrap();

        assert_eq!(stage.flushes(), 2);
        assert_eq!(stage.inner().fetcher.calls.len(), 2);
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn test_basic_lookup_per_row() {
        let mut stage = BasicLookup::new(table());
        let mut ctx = StageContext::detached("emails", StageOptions::new());
        let mut out = Emitter::new();

        stage.process(json!({"id": 1}), &mut ctx, &mut out).await.unwrap();
        stage.process(json!({"id": 2}), &mut ctx, &mut out).await.unwrap();

        assert_eq!(
            out.into_rows(),
            vec![
                json!({"id": 1, "user_id": 1, "email": "a@example.com"}),
                json!({"id": 2}),
            ]
        );
    }
}
