//! Rows flowing through a dataflow graph.

use serde_json::Value;

/// A single record flowing between stages.
pub type Row = Value;

/// Collects the rows a transform produces for one call.
///
/// A transform may emit zero, one or many rows per input row.
#[derive(Debug, Default)]
pub struct Emitter {
    rows: Vec<Row>,
}

impl Emitter {
    /// Creates an empty emitter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Emits a row downstream.
    pub fn emit(&mut self, row: Row) {
        self.rows.push(row);
    }

    /// Emits every row of an iterator, in order.
    pub fn emit_all(&mut self, rows: impl IntoIterator<Item = Row>) {
        self.rows.extend(rows);
    }

    /// Returns the number of pending rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if nothing was emitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Consumes the emitter, returning its rows in emission order.
    #[must_use]
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

/// Merges `overlay` into `base`, overlay keys winning.
///
/// Non-object rows are left untouched.
#[must_use]
pub fn merge_rows(mut base: Row, overlay: &Row) -> Row {
    if let (Some(target), Some(source)) = (base.as_object_mut(), overlay.as_object()) {
        for (key, value) in source {
            target.insert(key.clone(), value.clone());
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_emitter_keeps_order() {
        let mut out = Emitter::new();
        assert!(out.is_empty());

        out.emit(json!(1));
        out.emit_all(vec![json!(2), json!(3)]);

        assert_eq!(out.len(), 3);
        assert_eq!(out.into_rows(), vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn test_merge_rows_overlay_wins() {
        let merged = merge_rows(json!({"id": 1, "name": "a"}), &json!({"name": "b", "age": 3}));
        assert_eq!(merged, json!({"id": 1, "name": "b", "age": 3}));
    }

    #[test]
    fn test_merge_rows_ignores_scalars() {
        assert_eq!(merge_rows(json!(5), &json!({"a": 1})), json!(5));
    }
}
