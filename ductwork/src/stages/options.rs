//! Per-stage option maps.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Default number of rows a buffered stage accumulates before flushing.
pub const DEFAULT_BUFFER_SIZE: usize = 10_000;

/// Default number of rows a paginated source requests per page.
pub const DEFAULT_PAGE_SIZE: usize = 10_000;

/// Free-form options bound to a stage (buffer size, page size, user keys).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageOptions {
    values: HashMap<String, Value>,
}

impl StageOptions {
    /// Creates an empty option map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an option.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Sets an option in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Returns a raw option value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns an option as a string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Returns an option as a positive integer.
    ///
    /// Zero, negative and non-integer values are ignored.
    #[must_use]
    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.values
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
            .filter(|n| *n > 0)
    }

    /// The `buffer_size` option, or [`DEFAULT_BUFFER_SIZE`].
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.get_usize("buffer_size").unwrap_or(DEFAULT_BUFFER_SIZE)
    }

    /// The `page_size` option, or [`DEFAULT_PAGE_SIZE`].
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.get_usize("page_size").unwrap_or(DEFAULT_PAGE_SIZE)
    }

    /// Returns the number of options.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no option is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, Value)> for StageOptions {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let options = StageOptions::new();
        assert!(options.is_empty());
        assert_eq!(options.buffer_size(), DEFAULT_BUFFER_SIZE);
        assert_eq!(options.page_size(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_sizes_from_options() {
        let options = StageOptions::new()
            .with("buffer_size", 2)
            .with("page_size", 50)
            .with("table", "users");

        assert_eq!(options.buffer_size(), 2);
        assert_eq!(options.page_size(), 50);
        assert_eq!(options.get_str("table"), Some("users"));
        assert_eq!(options.len(), 3);
    }

    #[test]
    fn test_invalid_sizes_fall_back() {
        let options = StageOptions::new()
            .with("buffer_size", 0)
            .with("page_size", "big");

        assert_eq!(options.buffer_size(), DEFAULT_BUFFER_SIZE);
        assert_eq!(options.page_size(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_deserializes_from_plain_map() {
        let options: StageOptions = serde_json::from_value(json!({"buffer_size": 5})).unwrap();
        assert_eq!(options.buffer_size(), 5);
    }
}
