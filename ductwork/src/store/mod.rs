//! Status store contract and the job/pipeline status layout built on it.
//!
//! The store is the only mutable state shared between steps, dataflow jobs
//! and anyone watching progress from outside. Keys are namespaced strings,
//! values are JSON.

mod jobs;
mod memory;
mod records;

pub use jobs::JobStore;
pub use memory::InMemoryStatusStore;
pub use records::{JobRecord, PipelineRecord, StepRecord};

use crate::errors::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Key-value store holding registries and status records.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Reads a value.
    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Reads several values. Missing keys are absent from the result.
    async fn read_multi(&self, keys: &[String]) -> Result<HashMap<String, Value>, StoreError> {
        let mut values = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.read(key).await? {
                values.insert(key.clone(), value);
            }
        }
        Ok(values)
    }

    /// Writes a value, expiring after `ttl` when given.
    async fn write(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Adds `member` to the set stored at `key`.
    ///
    /// The default is a read-modify-write and is not atomic: concurrent
    /// registrations may lose members. Backends should override it.
    async fn register(
        &self,
        key: &str,
        member: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut members: Vec<String> = match self.read(key).await? {
            Some(value) => serde_json::from_value(value).map_err(|source| StoreError::Decode {
                key: key.to_string(),
                source,
            })?,
            None => Vec::new(),
        };
        if !members.iter().any(|m| m == member) {
            members.push(member.to_string());
        }
        self.write(key, Value::from(members), ttl).await
    }
}
