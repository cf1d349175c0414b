//! In-memory status store.

use super::StatusStore;
use crate::errors::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct StoredValue {
    value: Value,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// A process-local status store.
///
/// Entries expire lazily on read. `register` is atomic.
#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    entries: DashMap<String, StoredValue>,
}

impl InMemoryStatusStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn write(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.entries
            .insert(key.to_string(), StoredValue::new(value, ttl));
        Ok(())
    }

    async fn register(
        &self,
        key: &str,
        member: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredValue::new(Value::Array(Vec::new()), ttl));
        if entry.is_expired() || !entry.value.is_array() {
            *entry = StoredValue::new(Value::Array(Vec::new()), ttl);
        }

        let member = Value::from(member);
        if let Value::Array(members) = &mut entry.value {
            if !members.contains(&member) {
                members.push(member);
            }
        }
        entry.expires_at = ttl.map(|ttl| Instant::now() + ttl);
        Ok(())
    }
}
